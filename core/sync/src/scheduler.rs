//! Sync worker serializing on-demand sync requests.
//!
//! Callers never run the orchestrator directly. They send a request to the
//! worker task and await the reply; the worker runs one pass at a time and
//! keeps going when a caller stops waiting, so results always reach the store.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use catchsync_common::{Error, RecordCode, RecordSyncState, Result};

use crate::backend::CatchBackend;
use crate::engine::{SyncEngine, SyncReport};

/// Sync request types.
#[derive(Debug)]
pub enum SyncRequest {
    /// Sync every pending record.
    All(oneshot::Sender<Result<SyncReport>>),
    /// Sync one record.
    Record(RecordCode, oneshot::Sender<Result<RecordSyncState>>),
    /// Stop the worker.
    Shutdown,
}

/// Client side of the sync worker.
#[derive(Clone)]
pub struct SyncScheduler {
    request_tx: mpsc::Sender<SyncRequest>,
}

impl SyncScheduler {
    /// Create a scheduler and the handle that runs its worker.
    pub fn new() -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        (Self { request_tx }, SyncSchedulerHandle { request_rx })
    }

    /// Create a scheduler and spawn its worker around `engine`.
    pub fn spawn<B>(engine: Arc<SyncEngine<B>>) -> (Self, JoinHandle<()>)
    where
        B: CatchBackend + ?Sized + 'static,
    {
        let (scheduler, handle) = Self::new();
        let task = tokio::spawn(handle.run(engine));
        (scheduler, task)
    }

    /// Request a pass over every pending record.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SyncRequest::All(reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| Error::WorkerStopped("request dropped".to_string()))?
    }

    /// Request a sync of one record.
    pub async fn sync_record(&self, code: RecordCode) -> Result<RecordSyncState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(SyncRequest::Record(code, reply_tx)).await?;
        reply_rx
            .await
            .map_err(|_| Error::WorkerStopped("request dropped".to_string()))?
    }

    /// Stop the worker after the requests queued before this one.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(SyncRequest::Shutdown).await;
    }

    async fn send(&self, request: SyncRequest) -> Result<()> {
        self.request_tx
            .send(request)
            .await
            .map_err(|_| Error::WorkerStopped("not running".to_string()))
    }
}

/// Worker side of the scheduler.
pub struct SyncSchedulerHandle {
    request_rx: mpsc::Receiver<SyncRequest>,
}

impl SyncSchedulerHandle {
    /// Run the worker until shutdown or until every scheduler is dropped.
    ///
    /// `All` requests already queued when a pass starts are answered by that
    /// same pass.
    pub async fn run<B>(mut self, engine: Arc<SyncEngine<B>>)
    where
        B: CatchBackend + ?Sized,
    {
        let mut backlog: VecDeque<SyncRequest> = VecDeque::new();
        info!("Sync worker started");

        loop {
            let request = match backlog.pop_front() {
                Some(request) => request,
                None => match self.request_rx.recv().await {
                    Some(request) => request,
                    None => break,
                },
            };

            match request {
                SyncRequest::Shutdown => {
                    info!("Received shutdown request");
                    break;
                }
                SyncRequest::Record(code, reply) => {
                    debug!("Processing sync request for {}", code);
                    let result = engine.sync_record(&code).await;
                    if reply.send(result).is_err() {
                        debug!("Requester for {} went away", code);
                    }
                }
                SyncRequest::All(reply) => {
                    let mut waiters = vec![reply];
                    self.coalesce(&mut waiters, &mut backlog);
                    debug!("Processing sync of all records for {} requesters", waiters.len());

                    match engine.sync_all().await {
                        Ok(report) => {
                            for waiter in waiters {
                                let _ = waiter.send(Ok(report.clone()));
                            }
                        }
                        Err(e) => {
                            error!("Sync of all records failed: {}", e);
                            for waiter in waiters {
                                let _ = waiter.send(Err(e.clone()));
                            }
                        }
                    }
                }
            }
        }

        info!("Sync worker stopped");
    }

    /// Move queued `All` requests into `waiters`, keeping other requests in order.
    fn coalesce(
        &mut self,
        waiters: &mut Vec<oneshot::Sender<Result<SyncReport>>>,
        backlog: &mut VecDeque<SyncRequest>,
    ) {
        while let Ok(next) = self.request_rx.try_recv() {
            match next {
                SyncRequest::All(reply) => waiters.push(reply),
                SyncRequest::Shutdown => {
                    backlog.push_back(SyncRequest::Shutdown);
                    break;
                }
                other => backlog.push_back(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::memory::{MemoryBackend, ScriptedFailure};
    use catchsync_common::{CatchDraft, CatchRecord};
    use catchsync_store::RecordStore;
    use tempfile::TempDir;

    fn engine_with(codes: &[&str], dir: &TempDir) -> (Arc<SyncEngine<MemoryBackend>>, Arc<MemoryBackend>) {
        let store = Arc::new(RecordStore::in_memory().unwrap());
        for code in codes {
            let path = |name: &str| {
                let p = dir.path().join(format!("{}_{}", code, name));
                std::fs::write(&p, b"media").unwrap();
                p
            };
            let draft = CatchDraft {
                team: "Barracudas".to_string(),
                category: "boat".to_string(),
                modality: "trolling".to_string(),
                registered_by: "inspector-7".to_string(),
                species_id: String::new(),
                card_number: "C-1".to_string(),
                size: 30.5,
                total_points: 61.0,
                card_image: path("card.jpg"),
                fish_image: path("fish.jpg"),
                fish_video: path("fish.mp4"),
                latitude: 0.0,
                longitude: 0.0,
            };
            store
                .insert(&CatchRecord::from_draft(RecordCode::new(*code).unwrap(), draft))
                .unwrap();
        }
        let backend = Arc::new(MemoryBackend::new());
        let engine = Arc::new(SyncEngine::new(store, backend.clone(), SyncConfig::default()));
        (engine, backend)
    }

    #[tokio::test]
    async fn test_sync_request() {
        let dir = TempDir::new().unwrap();
        let (engine, backend) = engine_with(&["AB1234"], &dir);
        let (scheduler, task) = SyncScheduler::spawn(engine);

        let report = scheduler.sync_all().await.unwrap();
        assert_eq!(report.fully_synced, 1);
        assert_eq!(backend.call_count(), 2);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_record_request_surfaces_error() {
        let dir = TempDir::new().unwrap();
        let (engine, backend) = engine_with(&["AB1234"], &dir);
        backend.fail_metadata("AB1234", ScriptedFailure::Reject(500));
        let (scheduler, task) = SyncScheduler::spawn(engine);

        let err = scheduler
            .sync_record(RecordCode::new("AB1234").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServerRejected { status: 500, .. }));

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_sync_all_requests_share_one_pass() {
        let dir = TempDir::new().unwrap();
        let (engine, backend) = engine_with(&["AA0001", "AA0002"], &dir);
        let (scheduler, handle) = SyncScheduler::new();

        let mut replies = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = oneshot::channel();
            scheduler.send(SyncRequest::All(tx)).await.unwrap();
            replies.push(rx);
        }
        scheduler.shutdown().await;
        handle.run(engine).await;

        for reply in replies {
            let report = reply.await.unwrap().unwrap();
            assert_eq!(report.attempted, 2);
        }
        assert_eq!(backend.metadata_codes(), vec!["AA0001", "AA0002"]);
    }

    #[tokio::test]
    async fn test_worker_finishes_after_requester_leaves() {
        let dir = TempDir::new().unwrap();
        let (engine, _backend) = engine_with(&["AB1234"], &dir);
        let store = engine.store().clone();
        let (scheduler, handle) = SyncScheduler::new();

        let (tx, rx) = oneshot::channel();
        scheduler.send(SyncRequest::All(tx)).await.unwrap();
        drop(rx);
        scheduler.shutdown().await;
        handle.run(engine).await;

        let record = store.get(&RecordCode::new("AB1234").unwrap()).unwrap().unwrap();
        assert_eq!(record.sync_state(), RecordSyncState::FullySynced);
    }

    #[tokio::test]
    async fn test_request_after_shutdown_fails() {
        let dir = TempDir::new().unwrap();
        let (engine, _backend) = engine_with(&[], &dir);
        let (scheduler, task) = SyncScheduler::spawn(engine);

        scheduler.shutdown().await;
        task.await.unwrap();

        let err = scheduler.sync_all().await.unwrap_err();
        assert!(matches!(err, Error::WorkerStopped(_)));
    }

    #[tokio::test]
    async fn test_coalesced_requesters_share_the_error() {
        let dir = TempDir::new().unwrap();
        let (engine, backend) = engine_with(&["AB1234"], &dir);
        let (scheduler, handle) = SyncScheduler::new();

        let mut replies = Vec::new();
        for _ in 0..2 {
            let (tx, rx) = oneshot::channel();
            scheduler.send(SyncRequest::All(tx)).await.unwrap();
            replies.push(rx);
        }
        scheduler.shutdown().await;

        let _held = engine.hold_gate().await;
        handle.run(engine.clone()).await;

        for reply in replies {
            let err = reply.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::SyncInProgress));
        }
        assert_eq!(backend.call_count(), 0);
    }
}
