//! Durable local storage for catch records.
//!
//! The record store is the only source of truth while offline: every
//! captured record lands here before any network activity, and the sync
//! orchestrator only ever flips its two status flags.
//!
//! The media archive keeps private copies of the photo and video files a
//! record references, so later uploads do not depend on the capture device's
//! gallery.

pub mod archive;
pub mod store;

pub use archive::MediaArchive;
pub use store::RecordStore;
