//! SQLite-backed record store.
//!
//! Persists catch records locally so they survive restarts and long offline
//! periods. Every write is committed before the call returns.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use catchsync_common::{CatchRecord, Error, RecordCode, RecordSyncState, Result, StatusUpdate};

/// Key of the "last sync" timestamp in the metadata table.
const LAST_SYNC_KEY: &str = "last_sync";

const RECORD_COLUMNS: &str = "code, team, category, modality, registered_by, species_id, \
     card_number, size, total_points, card_image, fish_image, fish_video, \
     latitude, longitude, created_at, synchronized_data, synchronized_media";

/// Durable table of catch records.
///
/// The handle is explicitly constructed at startup and shared (behind an
/// `Arc`) between the capture flow and the sync orchestrator.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Create or open a record database.
    ///
    /// # Arguments
    /// - `db_path`: Path to the SQLite database file
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(storage_err)?;
        let store = Self::init(conn)?;
        info!("Record store opened at {}", db_path.as_ref().display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(storage_err)?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(storage_err)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS catch_records (
                code TEXT PRIMARY KEY NOT NULL,
                team TEXT NOT NULL,
                category TEXT NOT NULL,
                modality TEXT NOT NULL,
                registered_by TEXT NOT NULL,
                species_id TEXT NOT NULL,
                card_number TEXT NOT NULL,
                size REAL NOT NULL,
                total_points REAL NOT NULL,
                card_image TEXT NOT NULL,
                fish_image TEXT NOT NULL,
                fish_video TEXT NOT NULL,
                latitude REAL NOT NULL DEFAULT 0,
                longitude REAL NOT NULL DEFAULT 0,
                synchronized_data INTEGER NOT NULL DEFAULT 0,
                synchronized_media INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS sync_metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_catch_records_created
                ON catch_records(created_at);
            "#,
        )
        .map_err(storage_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("Record store connection lock poisoned".to_string()))
    }

    /// Insert a new record.
    ///
    /// Both sync flags are stored as false regardless of the values carried
    /// by `record`.
    ///
    /// # Errors
    /// - `DuplicateKey` if a record with the same code exists; the store is
    ///   left unchanged
    pub fn insert(&self, record: &CatchRecord) -> Result<()> {
        debug!("Inserting record {}", record.code);
        let conn = self.conn()?;
        let result = conn.execute(
            r#"
            INSERT INTO catch_records
            (code, team, category, modality, registered_by, species_id, card_number,
             size, total_points, card_image, fish_image, fish_video,
             latitude, longitude, created_at, synchronized_data, synchronized_media)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, 0)
            "#,
            params![
                record.code.as_str(),
                record.team,
                record.category,
                record.modality,
                record.registered_by,
                record.species_id,
                record.card_number,
                record.size,
                record.total_points,
                path_text(&record.card_image),
                path_text(&record.fish_image),
                path_text(&record.fish_video),
                record.latitude,
                record.longitude,
                format_timestamp(&record.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(Error::DuplicateKey(record.code.to_string()))
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Apply a partial update to a record's sync flags.
    ///
    /// No other column is touched.
    ///
    /// # Errors
    /// - `NotFound` if no record has this code
    pub fn update_status(&self, code: &RecordCode, update: StatusUpdate) -> Result<()> {
        if update.is_empty() {
            if self.contains(code)? {
                return Ok(());
            }
            return Err(Error::NotFound(format!("Record {}", code)));
        }

        debug!("Updating status of {}: {:?}", code, update);
        let conn = self.conn()?;
        let changed = conn
            .execute(
                r#"
                UPDATE catch_records SET
                    synchronized_data = COALESCE(?2, synchronized_data),
                    synchronized_media = COALESCE(?3, synchronized_media)
                WHERE code = ?1
                "#,
                params![
                    code.as_str(),
                    update.synchronized_data,
                    update.synchronized_media
                ],
            )
            .map_err(storage_err)?;

        if changed == 0 {
            return Err(Error::NotFound(format!("Record {}", code)));
        }
        Ok(())
    }

    /// All records, oldest first.
    ///
    /// Every call reads the current committed state.
    pub fn list_all(&self) -> Result<Vec<CatchRecord>> {
        self.query_records(&format!(
            "SELECT {} FROM catch_records ORDER BY created_at ASC, rowid ASC",
            RECORD_COLUMNS
        ))
    }

    /// Records with at least one channel not yet accepted, oldest first.
    pub fn pending(&self) -> Result<Vec<CatchRecord>> {
        self.query_records(&format!(
            "SELECT {} FROM catch_records \
             WHERE synchronized_data = 0 OR synchronized_media = 0 \
             ORDER BY created_at ASC, rowid ASC",
            RECORD_COLUMNS
        ))
    }

    fn query_records(&self, sql: &str) -> Result<Vec<CatchRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(storage_err)?;
        let rows = stmt.query_map([], row_to_record).map_err(storage_err)?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record.map_err(storage_err)?);
        }
        Ok(records)
    }

    /// Get a record by code.
    pub fn get(&self, code: &RecordCode) -> Result<Option<CatchRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM catch_records WHERE code = ?1",
                RECORD_COLUMNS
            ))
            .map_err(storage_err)?;

        stmt.query_row([code.as_str()], row_to_record)
            .optional()
            .map_err(storage_err)
    }

    /// Whether a record with this code exists.
    pub fn contains(&self, code: &RecordCode) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM catch_records WHERE code = ?1",
                [code.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        Ok(found.is_some())
    }

    /// Count records by sync state.
    pub fn count_by_state(&self) -> Result<HashMap<RecordSyncState, usize>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT synchronized_data, synchronized_media, COUNT(*) \
                 FROM catch_records GROUP BY synchronized_data, synchronized_media",
            )
            .map_err(storage_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(storage_err)?;

        let mut counts = HashMap::new();
        for row in rows {
            let (data, media, count) = row.map_err(storage_err)?;
            *counts
                .entry(RecordSyncState::from_flags(data, media))
                .or_insert(0) += count as usize;
        }
        Ok(counts)
    }

    /// Time the last batch sync finished, if any.
    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM sync_metadata WHERE key = ?1",
                [LAST_SYNC_KEY],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;

        value.map(|v| parse_timestamp(&v)).transpose()
    }

    /// Record the time a batch sync finished.
    pub fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_metadata (key, value) VALUES (?1, ?2)",
            params![LAST_SYNC_KEY, format_timestamp(&at)],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Delete every fully synchronized record.
    ///
    /// Administrative operation; the sync subsystem never deletes records.
    /// Returns the codes that were removed.
    pub fn clear_synchronized(&self) -> Result<Vec<RecordCode>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(storage_err)?;

        let codes = {
            let mut stmt = tx
                .prepare(
                    "SELECT code FROM catch_records \
                     WHERE synchronized_data = 1 AND synchronized_media = 1",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let mut codes = Vec::new();
            for code in rows {
                codes.push(RecordCode::new(code.map_err(storage_err)?)?);
            }
            codes
        };

        tx.execute(
            "DELETE FROM catch_records WHERE synchronized_data = 1 AND synchronized_media = 1",
            [],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;

        info!("Cleared {} synchronized records", codes.len());
        Ok(codes)
    }

    /// Delete every record, synchronized or not.
    pub fn clear_all(&self) -> Result<usize> {
        info!("Clearing record store");
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM catch_records", [])
            .map_err(storage_err)?;
        Ok(removed)
    }

    /// Get total record count.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM catch_records", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(count as u64)
    }
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("Invalid timestamp {:?}: {}", value, e)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<CatchRecord> {
    let code: String = row.get(0)?;
    let code = RecordCode::new(code)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let created_at: String = row.get(14)?;
    let created_at = parse_timestamp(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?;

    Ok(CatchRecord {
        code,
        team: row.get(1)?,
        category: row.get(2)?,
        modality: row.get(3)?,
        registered_by: row.get(4)?,
        species_id: row.get(5)?,
        card_number: row.get(6)?,
        size: row.get(7)?,
        total_points: row.get(8)?,
        card_image: PathBuf::from(row.get::<_, String>(9)?),
        fish_image: PathBuf::from(row.get::<_, String>(10)?),
        fish_video: PathBuf::from(row.get::<_, String>(11)?),
        latitude: row.get(12)?,
        longitude: row.get(13)?,
        created_at,
        synchronized_data: row.get(15)?,
        synchronized_media: row.get(16)?,
    })
}
