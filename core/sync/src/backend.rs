//! Backend transport trait definition.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use catchsync_common::{BackendVariant, MediaField, RecordCode, Result};

/// One file to send in a media upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPart {
    /// Which record field the file belongs to; also the multipart part name.
    pub field: MediaField,
    /// Deterministic upload name, `{team}_{field}_{code}.{ext}`.
    pub file_name: String,
    /// MIME type inferred from the file extension.
    pub content_type: &'static str,
    /// Local file to stream.
    pub path: PathBuf,
}

/// Transport for the two sync channels.
///
/// Implementations perform exactly one request per call and never retry;
/// retrying is left to the next orchestrator pass.
///
/// # Errors
/// Both operations report failures with the channel taxonomy:
/// - `Unreachable` when there is no network path
/// - `ServerRejected` when the backend answers with an error status
/// - `RequestBuild` when the request cannot be assembled locally
#[async_trait]
pub trait CatchBackend: Send + Sync {
    /// Get the backend name (e.g., "http", "memory").
    fn name(&self) -> &str;

    /// Submit the non-media fields of a record.
    ///
    /// Succeeds only on a 2xx response.
    async fn submit_metadata(&self, variant: BackendVariant, payload: &Value) -> Result<()>;

    /// Upload the media files of a record as one multipart transfer.
    ///
    /// Succeeds on any response status below 400.
    async fn upload_media(
        &self,
        variant: BackendVariant,
        code: &RecordCode,
        parts: Vec<MediaPart>,
    ) -> Result<()>;
}
