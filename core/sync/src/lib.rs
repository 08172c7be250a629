//! CatchSync sync subsystem
//!
//! Reconciles locally stored catch records with the competition backends:
//! - Format adapters shaping the metadata payload per backend variant
//! - Metadata and media channels over a pluggable transport
//! - HTTP transport and an in-memory transport for tests
//! - Orchestrator advancing records `Pending -> DataSynced -> FullySynced`
//! - Single-flight sync worker
//! - Capture flow and connectivity observer

pub mod backend;
pub mod capture;
pub mod channel;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod format;
pub mod http;
pub mod memory;
pub mod scheduler;

// Re-export main types
pub use backend::{CatchBackend, MediaPart};
pub use capture::{CaptureFlow, CaptureReceipt};
pub use channel::{content_type_for, part_file_name, MediaChannel, MediaUpload, MetadataChannel};
pub use config::{BackendConfig, MediaGapPolicy, SyncConfig, API_KEY_ENV};
pub use connectivity::{ConnectivityObserver, ConnectivityProbe, LinkState, RouteProbe};
pub use engine::{RecordFailure, SyncEngine, SyncProgress, SyncReport, SyncStage};
pub use format::build_payload;
pub use http::HttpBackend;
pub use memory::{BackendCall, MemoryBackend, ScriptedFailure};
pub use scheduler::{SyncRequest, SyncScheduler, SyncSchedulerHandle};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let config = SyncConfig::default();
        assert!(config.variant_for("boat").is_some());
        let _backend = MemoryBackend::new();
        let _ = LinkState::default();
    }
}
