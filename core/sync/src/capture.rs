//! Capture flow: validate, archive, persist, then optionally sync.

use std::sync::Arc;
use tracing::{debug, info, warn};

use catchsync_common::{
    CatchDraft, CatchRecord, Error, RecordCode, RecordSyncState, Result,
};
use catchsync_store::{MediaArchive, RecordStore};

use crate::backend::CatchBackend;
use crate::config::SyncConfig;
use crate::engine::SyncEngine;

/// Attempts at finding an unused record code before giving up.
const MAX_CODE_ATTEMPTS: usize = 16;

/// Result of submitting a capture.
#[derive(Debug)]
pub struct CaptureReceipt {
    /// The record as persisted.
    pub record: CatchRecord,
    /// Outcome of the immediate single-record sync.
    ///
    /// The record is safely stored whatever this says.
    pub sync: Result<RecordSyncState>,
}

/// Turns an inspector's draft into a persisted record.
pub struct CaptureFlow {
    store: Arc<RecordStore>,
    archive: Arc<MediaArchive>,
    config: Arc<SyncConfig>,
}

impl CaptureFlow {
    /// Create a new capture flow.
    pub fn new(store: Arc<RecordStore>, archive: Arc<MediaArchive>, config: Arc<SyncConfig>) -> Self {
        Self {
            store,
            archive,
            config,
        }
    }

    /// Validate and persist a draft under a freshly generated code.
    ///
    /// Media files are copied into the archive first so the record never
    /// references files the inspector might delete later.
    ///
    /// # Errors
    /// - `InvalidInput` if the category is unknown or a required field is empty
    /// - `LocalMediaMissing` if a media file does not exist
    /// - `Storage` if no unused code was found
    pub async fn persist(&self, draft: CatchDraft) -> Result<CatchRecord> {
        let variant = self.config.variant_for(&draft.category).ok_or_else(|| {
            Error::InvalidInput(format!("Unknown category {:?}", draft.category))
        })?;
        draft.validate(variant)?;

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = RecordCode::generate();
            if self.store.contains(&code)? {
                debug!("Code {} already taken (attempt {})", code, attempt);
                continue;
            }

            let archived = match self.archive.archive_draft(&code, draft.clone()).await {
                Ok(archived) => archived,
                Err(Error::DuplicateKey(_)) => {
                    debug!("Code {} already owns media (attempt {})", code, attempt);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let record = CatchRecord::from_draft(code, archived);
            match self.store.insert(&record) {
                Ok(()) => {
                    info!("Captured {} for team {}", record.code, record.team);
                    return Ok(record);
                }
                Err(Error::DuplicateKey(_)) => {
                    warn!("Code {} collided on insert (attempt {})", record.code, attempt);
                    self.archive.discard(&record.code).await?;
                }
                Err(e) => {
                    self.archive.discard(&record.code).await?;
                    return Err(e);
                }
            }
        }

        Err(Error::Storage(format!(
            "No unused record code after {} attempts",
            MAX_CODE_ATTEMPTS
        )))
    }

    /// Persist a draft, then try to sync it right away.
    ///
    /// Persistence errors fail the call. Sync errors are returned in the
    /// receipt so the caller can show them; the record stays pending for the
    /// next "sync all".
    pub async fn submit<B>(&self, draft: CatchDraft, engine: &SyncEngine<B>) -> Result<CaptureReceipt>
    where
        B: CatchBackend + ?Sized,
    {
        let record = self.persist(draft).await?;
        let sync = engine.sync_record(&record.code).await;
        if let Err(e) = &sync {
            warn!("Immediate sync of {} failed: {}", record.code, e);
        }
        Ok(CaptureReceipt { record, sync })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, ScriptedFailure};
    use catchsync_common::MediaField;
    use tempfile::TempDir;

    struct Fixture {
        inbox: TempDir,
        _archive_dir: TempDir,
        store: Arc<RecordStore>,
        archive: Arc<MediaArchive>,
        flow: CaptureFlow,
    }

    async fn fixture() -> Fixture {
        let inbox = TempDir::new().unwrap();
        let archive_dir = TempDir::new().unwrap();
        let store = Arc::new(RecordStore::in_memory().unwrap());
        let archive = Arc::new(MediaArchive::new(archive_dir.path()).await.unwrap());
        let flow = CaptureFlow::new(store.clone(), archive.clone(), Arc::new(SyncConfig::default()));
        Fixture {
            inbox,
            _archive_dir: archive_dir,
            store,
            archive,
            flow,
        }
    }

    fn draft(fx: &Fixture, category: &str) -> CatchDraft {
        let card = fx.inbox.path().join("card.jpg");
        let fish = fx.inbox.path().join("fish.jpg");
        let video = fx.inbox.path().join("fish.mp4");
        for path in [&card, &fish, &video] {
            std::fs::write(path, b"media").unwrap();
        }
        CatchDraft {
            team: "Barracudas".to_string(),
            category: category.to_string(),
            modality: "spinning".to_string(),
            registered_by: "inspector-7".to_string(),
            species_id: "12".to_string(),
            card_number: "C-0042".to_string(),
            size: 42.5,
            total_points: 85.0,
            card_image: card,
            fish_image: fish,
            fish_video: video,
            latitude: -23.5,
            longitude: -46.6,
        }
    }

    #[tokio::test]
    async fn test_persist_archives_media_and_stores_pending() {
        let fx = fixture().await;

        let record = fx.flow.persist(draft(&fx, "bank")).await.unwrap();

        assert_eq!(record.sync_state(), RecordSyncState::Pending);
        assert_eq!(fx.store.get(&record.code).unwrap(), Some(record.clone()));
        for field in MediaField::ALL {
            assert!(record.media_path(field).starts_with(fx.archive.record_dir(&record.code)));
            assert!(record.media_path(field).exists());
        }
    }

    #[tokio::test]
    async fn test_persist_rejects_unknown_category() {
        let fx = fixture().await;
        let err = fx.flow.persist(draft(&fx, "space")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(fx.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persist_requires_species_for_shore() {
        let fx = fixture().await;
        let mut d = draft(&fx, "shore");
        d.species_id.clear();

        let err = fx.flow.persist(d).await.unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(fx.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persist_missing_media_stores_nothing() {
        let fx = fixture().await;
        let mut d = draft(&fx, "boat");
        d.fish_video = fx.inbox.path().join("gone.mp4");

        let err = fx.flow.persist(d).await.unwrap_err();

        assert!(matches!(err, Error::LocalMediaMissing(_)));
        assert_eq!(fx.store.count().unwrap(), 0);
        assert_eq!(std::fs::read_dir(fx.archive.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_persist_generates_distinct_codes() {
        let fx = fixture().await;
        let a = fx.flow.persist(draft(&fx, "boat")).await.unwrap();
        let b = fx.flow.persist(draft(&fx, "boat")).await.unwrap();

        assert_ne!(a.code, b.code);
        assert_eq!(fx.store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_submit_syncs_immediately() {
        let fx = fixture().await;
        let backend = Arc::new(MemoryBackend::new());
        let engine = SyncEngine::new(fx.store.clone(), backend.clone(), SyncConfig::default());

        let receipt = fx.flow.submit(draft(&fx, "boat"), &engine).await.unwrap();

        assert_eq!(receipt.sync.unwrap(), RecordSyncState::FullySynced);
        assert_eq!(backend.metadata_codes(), vec![receipt.record.code.to_string()]);
    }

    #[tokio::test]
    async fn test_submit_keeps_record_when_offline() {
        let fx = fixture().await;
        let backend = Arc::new(MemoryBackend::new());
        backend.set_offline(true);
        let engine = SyncEngine::new(fx.store.clone(), backend, SyncConfig::default());

        let receipt = fx.flow.submit(draft(&fx, "boat"), &engine).await.unwrap();

        assert!(matches!(receipt.sync, Err(Error::Unreachable(_))));
        let stored = fx.store.get(&receipt.record.code).unwrap().unwrap();
        assert_eq!(stored.sync_state(), RecordSyncState::Pending);
    }

    #[tokio::test]
    async fn test_submit_media_failure_leaves_data_synced() {
        let fx = fixture().await;
        let backend = Arc::new(MemoryBackend::new());
        let engine = SyncEngine::new(fx.store.clone(), backend.clone(), SyncConfig::default());

        let record = fx.flow.persist(draft(&fx, "boat")).await.unwrap();
        backend.fail_media(record.code.as_str(), ScriptedFailure::Reject(502));
        let err = engine.sync_record(&record.code).await.unwrap_err();

        assert!(matches!(err, Error::ServerRejected { status: 502, .. }));
        let stored = fx.store.get(&record.code).unwrap().unwrap();
        assert_eq!(stored.sync_state(), RecordSyncState::DataSynced);
    }
}
