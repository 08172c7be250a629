//! Common types shared across the catch-sync crates.
//!
//! This module provides the record model, the backend variant tag and the
//! error taxonomy used by the store, the sync channels and the orchestrator.

pub mod error;
pub mod record;
pub mod types;

pub use error::{Error, Result};
pub use record::{coerce_size, CatchDraft, CatchRecord, RecordSyncState, StatusUpdate};
pub use types::{BackendVariant, MediaField, RecordCode};
