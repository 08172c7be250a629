//! Sync orchestrator driving pending records through both channels.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use catchsync_common::{
    CatchRecord, Error, RecordCode, RecordSyncState, Result, StatusUpdate,
};
use catchsync_store::RecordStore;

use crate::backend::CatchBackend;
use crate::channel::{MediaChannel, MetadataChannel};
use crate::config::SyncConfig;

/// Channel step of a record's sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Metadata,
    Media,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStage::Metadata => f.write_str("metadata"),
            SyncStage::Media => f.write_str("media"),
        }
    }
}

/// A record that did not finish in a batch pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub code: RecordCode,
    pub stage: SyncStage,
    /// State the record was left in.
    pub state: RecordSyncState,
    pub message: String,
}

/// Outcome of one "sync all" pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    /// Records the pass tried to advance.
    pub attempted: usize,
    /// Records that ended fully synchronized.
    pub fully_synced: usize,
    /// Records whose metadata is synced but whose media is still pending.
    pub data_only: usize,
    /// Per-record failures, in processing order.
    pub failures: Vec<RecordFailure>,
    /// The "last sync" timestamp written at the end of the pass.
    pub finished_at: DateTime<Utc>,
    #[serde(skip)]
    pub duration: Duration,
}

impl SyncReport {
    /// Whether every attempted record reached `FullySynced`.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Progress of the running pass, published for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pub running: bool,
    pub done: usize,
    pub total: usize,
}

/// Failure of a single record, tagged with the step that failed.
struct StageFailure {
    stage: SyncStage,
    state: RecordSyncState,
    error: Error,
}

/// Drives records through `Pending -> DataSynced -> FullySynced`.
///
/// Records are processed one at a time, oldest first. Metadata always goes
/// before media, and a record's flags are written to the store as soon as
/// the corresponding channel succeeds.
pub struct SyncEngine<B: CatchBackend + ?Sized> {
    store: Arc<RecordStore>,
    metadata: MetadataChannel<B>,
    media: MediaChannel<B>,
    config: Arc<SyncConfig>,
    /// Held for the duration of a pass; at most one pass runs at a time.
    gate: Mutex<()>,
    progress: watch::Sender<SyncProgress>,
}

impl<B: CatchBackend + ?Sized> SyncEngine<B> {
    /// Create a new sync engine.
    pub fn new(store: Arc<RecordStore>, backend: Arc<B>, config: SyncConfig) -> Self {
        let config = Arc::new(config);
        let (progress, _) = watch::channel(SyncProgress::default());
        Self {
            store,
            metadata: MetadataChannel::new(backend.clone(), config.clone()),
            media: MediaChannel::new(backend, config.clone()),
            config,
            gate: Mutex::new(()),
            progress,
        }
    }

    /// The record store this engine writes to.
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Watch the progress of running passes.
    pub fn subscribe_progress(&self) -> watch::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Whether a batch pass should pick this record up.
    fn needs_sync(&self, record: &CatchRecord) -> bool {
        !record.synchronized_data
            || (self.config.retry_media_only && !record.is_fully_synchronized())
    }

    /// Hold the single-pass gate, as a running pass would.
    #[cfg(test)]
    pub(crate) async fn hold_gate(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Synchronize every pending record.
    ///
    /// Per-record channel failures are logged and collected in the report;
    /// they never fail the pass. The "last sync" timestamp is written once,
    /// after the whole queue has been drained.
    ///
    /// # Errors
    /// - `SyncInProgress` if another pass is running
    /// - Store errors, which indicate a broken contract and abort the pass
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let _guard = self.gate.try_lock().map_err(|_| Error::SyncInProgress)?;
        let start = Instant::now();

        let mut queue: VecDeque<CatchRecord> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|r| self.needs_sync(r))
            .collect();

        if queue.is_empty() {
            let finished_at = Utc::now();
            self.store.set_last_sync(finished_at)?;
            debug!("Nothing to sync");
            return Ok(SyncReport {
                attempted: 0,
                fully_synced: 0,
                data_only: 0,
                failures: Vec::new(),
                finished_at,
                duration: start.elapsed(),
            });
        }

        let total = queue.len();
        info!("Starting sync of {} pending records", total);
        self.publish(true, 0, total);

        let mut fully_synced = 0;
        let mut failures = Vec::new();
        let mut done = 0;

        while let Some(record) = queue.pop_front() {
            match self.advance(&record).await {
                Ok(_) => fully_synced += 1,
                Err(failure) if failure.error.is_channel_failure() => {
                    error!(
                        "Sync of {} failed at {} stage: {}",
                        record.code, failure.stage, failure.error
                    );
                    failures.push(RecordFailure {
                        code: record.code.clone(),
                        stage: failure.stage,
                        state: failure.state,
                        message: failure.error.to_string(),
                    });
                }
                Err(failure) => {
                    self.publish(false, done, total);
                    return Err(failure.error);
                }
            }
            done += 1;
            self.publish(true, done, total);
        }

        let finished_at = Utc::now();
        self.store.set_last_sync(finished_at)?;
        self.publish(false, done, total);

        let data_only = failures
            .iter()
            .filter(|f| f.state == RecordSyncState::DataSynced)
            .count();

        let duration = start.elapsed();
        info!(
            "Sync completed in {:?}: {} attempted, {} fully synced, {} data only, {} failed",
            duration,
            total,
            fully_synced,
            data_only,
            failures.len()
        );

        Ok(SyncReport {
            attempted: total,
            fully_synced,
            data_only,
            failures,
            finished_at,
            duration,
        })
    }

    /// Synchronize one record and surface its error to the caller.
    ///
    /// Follows the same metadata-then-media ordering as [`Self::sync_all`].
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `SyncInProgress` if a batch pass is running
    /// - Any channel error
    pub async fn sync_record(&self, code: &RecordCode) -> Result<RecordSyncState> {
        let _guard = self.gate.try_lock().map_err(|_| Error::SyncInProgress)?;

        let record = self
            .store
            .get(code)?
            .ok_or_else(|| Error::NotFound(format!("Record {}", code)))?;

        match self.advance(&record).await {
            Ok(state) => Ok(state),
            Err(failure) => {
                warn!(
                    "Sync of {} failed at {} stage: {}",
                    code, failure.stage, failure.error
                );
                Err(failure.error)
            }
        }
    }

    /// Move one record as far along the state machine as the backend allows.
    async fn advance(&self, record: &CatchRecord) -> std::result::Result<RecordSyncState, StageFailure> {
        let mut state = record.sync_state();

        if !record.synchronized_data {
            self.metadata
                .submit(record)
                .await
                .map_err(|error| StageFailure {
                    stage: SyncStage::Metadata,
                    state,
                    error,
                })?;
            self.store
                .update_status(&record.code, StatusUpdate::data_synced())
                .map_err(|error| StageFailure {
                    stage: SyncStage::Metadata,
                    state,
                    error,
                })?;
            state = RecordSyncState::DataSynced;
            info!("Metadata of {} accepted", record.code);
        }

        if !record.synchronized_media {
            let upload = self
                .media
                .upload(record)
                .await
                .map_err(|error| StageFailure {
                    stage: SyncStage::Media,
                    state,
                    error,
                })?;
            self.store
                .update_status(&record.code, StatusUpdate::media_synced())
                .map_err(|error| StageFailure {
                    stage: SyncStage::Media,
                    state,
                    error,
                })?;
            state = RecordSyncState::FullySynced;
            if upload.omitted.is_empty() {
                info!("Media of {} accepted", record.code);
            } else {
                warn!(
                    "Media of {} accepted without {:?}",
                    record.code, upload.omitted
                );
            }
        }

        Ok(state)
    }

    fn publish(&self, running: bool, done: usize, total: usize) {
        self.progress.send_replace(SyncProgress {
            running,
            done,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, ScriptedFailure};
    use catchsync_common::CatchDraft;
    use chrono::Duration as ChronoDuration;
    use std::path::Path;
    use tempfile::TempDir;

    struct Fixture {
        media: TempDir,
        store: Arc<RecordStore>,
        backend: Arc<MemoryBackend>,
        engine: SyncEngine<MemoryBackend>,
    }

    fn fixture_with(config: SyncConfig) -> Fixture {
        let media = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let backend = Arc::new(MemoryBackend::new());
        let engine = SyncEngine::new(store.clone(), backend.clone(), config);
        Fixture {
            media,
            store,
            backend,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SyncConfig::default())
    }

    fn write_media(dir: &Path, code: &str) -> [std::path::PathBuf; 3] {
        let card = dir.join(format!("{}_card.jpg", code));
        let fish = dir.join(format!("{}_fish.jpg", code));
        let video = dir.join(format!("{}_fish.mp4", code));
        for path in [&card, &fish, &video] {
            std::fs::write(path, b"media").unwrap();
        }
        [card, fish, video]
    }

    /// Insert records `codes` with strictly increasing creation times.
    fn seed(fx: &Fixture, codes: &[&str], category: &str) {
        let base = Utc::now() - ChronoDuration::minutes(10);
        for (i, code) in codes.iter().enumerate() {
            let [card, fish, video] = write_media(fx.media.path(), code);
            let draft = CatchDraft {
                team: "Barracudas".to_string(),
                category: category.to_string(),
                modality: "spinning".to_string(),
                registered_by: "inspector-7".to_string(),
                species_id: "12".to_string(),
                card_number: format!("C-{}", i),
                size: 42.0,
                total_points: 84.0,
                card_image: card,
                fish_image: fish,
                fish_video: video,
                latitude: -23.5,
                longitude: -46.6,
            };
            let mut record = CatchRecord::from_draft(RecordCode::new(*code).unwrap(), draft);
            record.created_at = base + ChronoDuration::seconds(i as i64);
            fx.store.insert(&record).unwrap();
        }
    }

    fn state_of(fx: &Fixture, code: &str) -> RecordSyncState {
        fx.store
            .get(&RecordCode::new(code).unwrap())
            .unwrap()
            .unwrap()
            .sync_state()
    }

    #[tokio::test]
    async fn test_scenario_full_sync() {
        let fx = fixture();
        seed(&fx, &["AB1234"], "variant-B");

        let report = fx.engine.sync_all().await.unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(report.fully_synced, 1);
        assert!(report.is_clean());
        assert_eq!(state_of(&fx, "AB1234"), RecordSyncState::FullySynced);
        assert_eq!(fx.backend.metadata_codes(), vec!["AB1234"]);
        assert_eq!(fx.backend.media_codes(), vec!["AB1234"]);
    }

    #[tokio::test]
    async fn test_scenario_metadata_rejected_skips_media() {
        let fx = fixture();
        seed(&fx, &["AB1234"], "variant-B");
        fx.backend
            .fail_metadata("AB1234", ScriptedFailure::Reject(500));

        let report = fx.engine.sync_all().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.stage, SyncStage::Metadata);
        assert_eq!(failure.state, RecordSyncState::Pending);
        assert!(failure.message.contains("500"));
        assert_eq!(state_of(&fx, "AB1234"), RecordSyncState::Pending);
        assert!(fx.backend.media_codes().is_empty());
    }

    #[tokio::test]
    async fn test_single_record_surfaces_server_rejected() {
        let fx = fixture();
        seed(&fx, &["AB1234"], "variant-B");
        fx.backend
            .fail_metadata("AB1234", ScriptedFailure::Reject(500));

        let err = fx
            .engine
            .sync_record(&RecordCode::new("AB1234").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ServerRejected { status: 500, .. }));
        assert!(fx.backend.media_codes().is_empty());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_batch() {
        let fx = fixture();
        let codes = ["AA0001", "AA0002", "AA0003", "AA0004", "AA0005"];
        seed(&fx, &codes, "boat");
        fx.backend
            .fail_metadata("AA0003", ScriptedFailure::Unreachable);

        let report = fx.engine.sync_all().await.unwrap();

        assert_eq!(report.attempted, 5);
        assert_eq!(report.fully_synced, 4);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code.as_str(), "AA0003");
        assert_eq!(fx.backend.metadata_codes(), codes.to_vec());
        for code in ["AA0001", "AA0002", "AA0004", "AA0005"] {
            assert_eq!(state_of(&fx, code), RecordSyncState::FullySynced);
        }
        assert_eq!(state_of(&fx, "AA0003"), RecordSyncState::Pending);
    }

    #[tokio::test]
    async fn test_records_processed_oldest_first_metadata_before_media() {
        let fx = fixture();
        seed(&fx, &["ZZ0001", "AA0002"], "shore");

        fx.engine.sync_all().await.unwrap();

        let order: Vec<(String, bool)> = fx
            .backend
            .calls()
            .iter()
            .map(|c| {
                (
                    c.code().to_string(),
                    matches!(c, crate::memory::BackendCall::Media { .. }),
                )
            })
            .collect();
        assert_eq!(
            order,
            vec![
                ("ZZ0001".to_string(), false),
                ("ZZ0001".to_string(), true),
                ("AA0002".to_string(), false),
                ("AA0002".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_data_synced_record_never_resubmits_metadata() {
        let fx = fixture();
        seed(&fx, &["AB1234"], "boat");
        fx.backend.fail_media("AB1234", ScriptedFailure::Reject(503));

        let first = fx.engine.sync_all().await.unwrap();
        assert_eq!(first.failures[0].stage, SyncStage::Media);
        assert_eq!(first.failures[0].state, RecordSyncState::DataSynced);
        assert_eq!(first.data_only, 1);
        assert_eq!(state_of(&fx, "AB1234"), RecordSyncState::DataSynced);

        fx.backend.heal();
        let second = fx.engine.sync_all().await.unwrap();

        assert!(second.is_clean());
        assert_eq!(fx.backend.metadata_codes(), vec!["AB1234"]);
        assert_eq!(fx.backend.media_codes(), vec!["AB1234", "AB1234"]);
        assert_eq!(state_of(&fx, "AB1234"), RecordSyncState::FullySynced);
    }

    #[tokio::test]
    async fn test_media_only_retry_can_be_disabled() {
        let fx = fixture_with(SyncConfig {
            retry_media_only: false,
            ..SyncConfig::default()
        });
        seed(&fx, &["AB1234"], "boat");
        fx.backend.fail_media("AB1234", ScriptedFailure::Unreachable);
        fx.engine.sync_all().await.unwrap();
        fx.backend.heal();

        let calls_before = fx.backend.call_count();
        let report = fx.engine.sync_all().await.unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(fx.backend.call_count(), calls_before);
        assert_eq!(state_of(&fx, "AB1234"), RecordSyncState::DataSynced);
    }

    #[tokio::test]
    async fn test_second_sync_all_is_network_free() {
        let fx = fixture();
        seed(&fx, &["AA0001", "AA0002"], "boat");

        fx.engine.sync_all().await.unwrap();
        let calls_after_first = fx.backend.call_count();
        let first_sync = fx.store.last_sync().unwrap().unwrap();

        let report = fx.engine.sync_all().await.unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(fx.backend.call_count(), calls_after_first);
        assert!(fx.store.last_sync().unwrap().unwrap() >= first_sync);
    }

    #[tokio::test]
    async fn test_record_with_all_media_lost_finishes() {
        let fx = fixture();
        seed(&fx, &["AB1234"], "boat");
        for name in ["AB1234_card.jpg", "AB1234_fish.jpg", "AB1234_fish.mp4"] {
            std::fs::remove_file(fx.media.path().join(name)).unwrap();
        }

        let report = fx.engine.sync_all().await.unwrap();

        assert!(report.is_clean());
        assert_eq!(state_of(&fx, "AB1234"), RecordSyncState::FullySynced);
        match &fx.backend.calls()[1] {
            crate::memory::BackendCall::Media { fields, .. } => assert!(fields.is_empty()),
            other => panic!("unexpected call: {other:?}"),
        }

        let calls = fx.backend.call_count();
        let again = fx.engine.sync_all().await.unwrap();
        assert_eq!(again.attempted, 0);
        assert_eq!(fx.backend.call_count(), calls);
    }

    #[tokio::test]
    async fn test_empty_store_records_last_sync() {
        let fx = fixture();
        assert!(fx.store.last_sync().unwrap().is_none());

        let report = fx.engine.sync_all().await.unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(fx.backend.call_count(), 0);
        assert!(fx.store.last_sync().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_offline_batch_completes_and_keeps_records_pending() {
        let fx = fixture();
        seed(&fx, &["AA0001", "AA0002"], "boat");
        fx.backend.set_offline(true);

        let report = fx.engine.sync_all().await.unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(fx.store.count().unwrap(), 2);
        assert!(fx.store.last_sync().unwrap().is_some());
        assert_eq!(state_of(&fx, "AA0001"), RecordSyncState::Pending);
    }

    #[tokio::test]
    async fn test_unknown_category_reported_per_record() {
        let fx = fixture();
        seed(&fx, &["AA0001"], "space");
        seed(&fx, &["AA0002"], "boat");

        let report = fx.engine.sync_all().await.unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].code.as_str(), "AA0001");
        assert_eq!(state_of(&fx, "AA0002"), RecordSyncState::FullySynced);
    }

    #[tokio::test]
    async fn test_concurrent_pass_is_rejected() {
        let fx = fixture();
        let _held = fx.engine.gate.lock().await;

        let err = fx.engine.sync_all().await.unwrap_err();
        assert!(matches!(err, Error::SyncInProgress));
    }

    #[tokio::test]
    async fn test_sync_record_missing_code() {
        let fx = fixture();
        let err = fx
            .engine
            .sync_record(&RecordCode::new("ZZ9999").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_progress_reports_completion() {
        let fx = fixture();
        seed(&fx, &["AA0001", "AA0002"], "boat");
        let progress = fx.engine.subscribe_progress();

        fx.engine.sync_all().await.unwrap();

        assert_eq!(
            *progress.borrow(),
            SyncProgress {
                running: false,
                done: 2,
                total: 2
            }
        );
    }
}
