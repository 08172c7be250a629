//! CatchSync CLI - Command line interface for catch capture and sync.
//!
//! This tool records catches into the local store, inspects them, and
//! reconciles them with the competition backends on demand.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use catchsync_common::{coerce_size, BackendVariant, CatchDraft, RecordCode, RecordSyncState};
use catchsync_store::{MediaArchive, RecordStore};
use catchsync_sync::{
    CaptureFlow, ConnectivityObserver, HttpBackend, RouteProbe, SyncEngine, SyncScheduler,
};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "catchsync")]
#[command(about = "CatchSync - Offline catch records with backend sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the config file.
    #[arg(short, long, default_value = "catchsync.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Record a catch, then try to sync it.
    Capture {
        #[arg(long)]
        team: String,

        /// Competition category; selects the backend.
        #[arg(long)]
        category: String,

        #[arg(long, default_value = "")]
        modality: String,

        /// Inspector registering the catch.
        #[arg(long)]
        registered_by: String,

        /// Species identifier (required for shore categories).
        #[arg(long, default_value = "")]
        species_id: String,

        #[arg(long)]
        card_number: String,

        /// Measured size; a comma decimal separator is accepted.
        #[arg(long, value_parser = parse_size)]
        size: f64,

        #[arg(long, default_value_t = 0.0)]
        total_points: f64,

        #[arg(long)]
        card_image: PathBuf,

        #[arg(long)]
        fish_image: PathBuf,

        #[arg(long)]
        fish_video: PathBuf,

        #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
        latitude: f64,

        #[arg(long, allow_negative_numbers = true, default_value_t = 0.0)]
        longitude: f64,

        /// Only store the record.
        #[arg(long)]
        no_sync: bool,
    },

    /// List stored records.
    List {
        /// Only records that still need syncing.
        #[arg(short, long)]
        pending: bool,
    },

    /// Print one record as JSON.
    Show {
        code: String,
    },

    /// Sync every pending record.
    Sync,

    /// Sync one record and report its error, if any.
    SyncRecord {
        code: String,
    },

    /// Show record counts, last sync time and connectivity.
    Status,

    /// Delete fully synchronized records and their media.
    Clear {
        /// Delete every record, synchronized or not.
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config;
    let load = || AppConfig::load(&config_path);

    match cli.command {
        Commands::Init { force } => cmd_init(&config_path, force),

        Commands::Capture {
            team,
            category,
            modality,
            registered_by,
            species_id,
            card_number,
            size,
            total_points,
            card_image,
            fish_image,
            fish_video,
            latitude,
            longitude,
            no_sync,
        } => {
            let draft = CatchDraft {
                team,
                category,
                modality,
                registered_by,
                species_id,
                card_number,
                size,
                total_points,
                card_image,
                fish_image,
                fish_video,
                latitude,
                longitude,
            };
            cmd_capture(&load()?, draft, no_sync).await
        }

        Commands::List { pending } => cmd_list(&load()?, pending),

        Commands::Show { code } => cmd_show(&load()?, &code),

        Commands::Sync => cmd_sync(&load()?).await,

        Commands::SyncRecord { code } => cmd_sync_record(&load()?, &code).await,

        Commands::Status => cmd_status(&load()?).await,

        Commands::Clear { all } => cmd_clear(&load()?, all).await,
    }
}

fn parse_size(raw: &str) -> std::result::Result<f64, String> {
    coerce_size(raw).map_err(|e| e.to_string())
}

fn parse_code(raw: &str) -> Result<RecordCode> {
    RecordCode::new(raw).context("Invalid record code")
}

fn open_store(config: &AppConfig) -> Result<Arc<RecordStore>> {
    let store = RecordStore::open(&config.database_path).with_context(|| {
        format!("Failed to open store {}", config.database_path.display())
    })?;
    Ok(Arc::new(store))
}

fn build_engine(config: &AppConfig, store: Arc<RecordStore>) -> Result<Arc<SyncEngine<HttpBackend>>> {
    let backend = HttpBackend::new(config.sync.backends.clone())
        .context("Failed to create backend client")?;
    Ok(Arc::new(SyncEngine::new(
        store,
        Arc::new(backend),
        config.sync.clone(),
    )))
}

fn state_label(state: RecordSyncState) -> &'static str {
    match state {
        RecordSyncState::Pending => "pending",
        RecordSyncState::DataSynced => "data synced",
        RecordSyncState::FullySynced => "synced",
    }
}

/// Write a default config file.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    AppConfig::default().save(path, force)?;
    println!("Config written to {}", path.display());
    println!("  Set backend URLs under sync.backends and the API key via CATCHSYNC_API_KEY.");
    Ok(())
}

/// Store a new catch and optionally sync it.
async fn cmd_capture(config: &AppConfig, draft: CatchDraft, no_sync: bool) -> Result<()> {
    let store = open_store(config)?;
    let archive = Arc::new(
        MediaArchive::new(&config.media_dir)
            .await
            .context("Failed to open media archive")?,
    );
    let flow = CaptureFlow::new(store.clone(), archive, Arc::new(config.sync.clone()));

    if no_sync {
        let record = flow.persist(draft).await.context("Failed to store catch")?;
        println!("Catch stored: {}", record.code);
        return Ok(());
    }

    let engine = build_engine(config, store)?;
    let receipt = flow
        .submit(draft, engine.as_ref())
        .await
        .context("Failed to store catch")?;

    println!("Catch stored: {}", receipt.record.code);
    match receipt.sync {
        Ok(state) => println!("  Sync: {}", state_label(state)),
        Err(e) => println!("  Sync failed: {} (record kept for the next sync)", e),
    }
    Ok(())
}

/// List records, oldest first.
fn cmd_list(config: &AppConfig, pending_only: bool) -> Result<()> {
    let store = open_store(config)?;
    let records = if pending_only {
        store.pending()?
    } else {
        store.list_all()?
    };

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }

    for record in records {
        println!(
            "  {}  {}  {:<12} {:<20} {:>7.2}  {}",
            record.code,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.category,
            record.team,
            record.size,
            state_label(record.sync_state())
        );
    }
    Ok(())
}

/// Print a record without touching its state.
fn cmd_show(config: &AppConfig, code: &str) -> Result<()> {
    let store = open_store(config)?;
    let code = parse_code(code)?;
    let record = store
        .get(&code)?
        .with_context(|| format!("No record {}", code))?;

    let json = serde_json::to_string_pretty(&record).context("Failed to serialize record")?;
    println!("{}", json);
    Ok(())
}

/// Run one "sync all" pass through the sync worker.
async fn cmd_sync(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let engine = build_engine(config, store)?;
    let mut progress = engine.subscribe_progress();
    let (scheduler, worker) = SyncScheduler::spawn(engine);

    let request = scheduler.sync_all();
    tokio::pin!(request);
    let report = loop {
        tokio::select! {
            result = &mut request => break result.context("Sync failed")?,
            Ok(()) = progress.changed() => {
                let p = *progress.borrow_and_update();
                if p.running && p.done > 0 {
                    println!("  {}/{} records processed", p.done, p.total);
                }
            }
        }
    };

    scheduler.shutdown().await;
    worker.await.context("Sync worker panicked")?;

    if report.attempted == 0 {
        println!("Nothing to sync.");
        return Ok(());
    }

    println!(
        "Sync finished in {:?}: {} attempted, {} fully synced, {} data only",
        report.duration, report.attempted, report.fully_synced, report.data_only
    );
    for failure in &report.failures {
        println!(
            "  {} failed at {} stage ({}): {}",
            failure.code,
            failure.stage,
            state_label(failure.state),
            failure.message
        );
    }
    Ok(())
}

/// Sync a single record.
async fn cmd_sync_record(config: &AppConfig, code: &str) -> Result<()> {
    let code = parse_code(code)?;
    let store = open_store(config)?;
    let engine = build_engine(config, store)?;

    let state = engine
        .sync_record(&code)
        .await
        .with_context(|| format!("Sync of {} failed", code))?;
    println!("{}: {}", code, state_label(state));
    Ok(())
}

/// Show store counters and probe both backends.
async fn cmd_status(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let counts = store.count_by_state()?;
    let count = |state: RecordSyncState| counts.get(&state).copied().unwrap_or(0);

    println!("Records:");
    println!("  Pending:      {}", count(RecordSyncState::Pending));
    println!("  Data synced:  {}", count(RecordSyncState::DataSynced));
    println!("  Fully synced: {}", count(RecordSyncState::FullySynced));
    match store.last_sync()? {
        Some(at) => println!("Last sync: {}", at.to_rfc3339()),
        None => println!("Last sync: never"),
    }

    println!("Backends:");
    for variant in [BackendVariant::Offshore, BackendVariant::Shore] {
        let url = config.sync.backends.base_url(variant);
        let probe = RouteProbe::from_url(url, Duration::from_secs(5))
            .with_context(|| format!("Invalid {} URL", variant))?;
        let observer = ConnectivityObserver::new(Arc::new(probe));
        let link = observer.refresh().await;
        println!(
            "  {} ({}): {}",
            variant,
            url,
            if link.is_online() { "online" } else { "offline" }
        );
    }
    Ok(())
}

/// Administrative clearing of records and their archived media.
async fn cmd_clear(config: &AppConfig, all: bool) -> Result<()> {
    let store = open_store(config)?;
    let archive = MediaArchive::new(&config.media_dir)
        .await
        .context("Failed to open media archive")?;

    let removed = if all {
        let codes: Vec<RecordCode> = store.list_all()?.into_iter().map(|r| r.code).collect();
        store.clear_all()?;
        codes
    } else {
        store.clear_synchronized()?
    };

    for code in &removed {
        archive
            .discard(code)
            .await
            .with_context(|| format!("Failed to remove media of {}", code))?;
    }

    info!("Cleared {} records", removed.len());
    println!("Removed {} records.", removed.len());
    Ok(())
}
