//! Metadata and media sync channels.
//!
//! A channel turns one record into one backend request. Neither channel
//! retries or touches the store; the orchestrator decides what a success or
//! failure means for the record.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use catchsync_common::{BackendVariant, CatchRecord, Error, MediaField, Result};

use crate::backend::{CatchBackend, MediaPart};
use crate::config::{MediaGapPolicy, SyncConfig};
use crate::format::build_payload;

/// Resolve the backend variant of a record's category.
///
/// An unknown category is malformed local state.
fn resolve_variant(config: &SyncConfig, record: &CatchRecord) -> Result<BackendVariant> {
    config.variant_for(&record.category).ok_or_else(|| {
        Error::RequestBuild(format!(
            "Record {} has unknown category {:?}",
            record.code, record.category
        ))
    })
}

/// Infer a MIME type from a file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("heic") => "image/heic",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("3gp") => "video/3gpp",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Upload name of a media part: `{team}_{field}_{code}.{ext}`.
///
/// Characters outside `[A-Za-z0-9_-]` in the team name are replaced so the
/// name stays a valid file name.
pub fn part_file_name(record: &CatchRecord, field: MediaField) -> String {
    let team: String = record
        .team
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let ext = record
        .media_path(field)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string());

    format!("{}_{}_{}.{}", team, field.as_str(), record.code, ext)
}

/// Submits the non-media fields of a record.
pub struct MetadataChannel<B: CatchBackend + ?Sized> {
    backend: Arc<B>,
    config: Arc<SyncConfig>,
}

impl<B: CatchBackend + ?Sized> MetadataChannel<B> {
    /// Create a channel over `backend`.
    pub fn new(backend: Arc<B>, config: Arc<SyncConfig>) -> Self {
        Self { backend, config }
    }

    /// Send the record's payload to its backend's no-media endpoint.
    pub async fn submit(&self, record: &CatchRecord) -> Result<()> {
        let variant = resolve_variant(&self.config, record)?;
        let payload = build_payload(record, variant)?;
        debug!(
            "Submitting metadata of {} to {} via {}",
            record.code,
            variant,
            self.backend.name()
        );
        self.backend.submit_metadata(variant, &payload).await
    }
}

/// What a media upload actually carried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaUpload {
    /// Fields whose files were sent.
    pub sent: Vec<MediaField>,
    /// Fields skipped because their file was missing.
    pub omitted: Vec<MediaField>,
}

/// Uploads the three media files of a record in one multipart request.
pub struct MediaChannel<B: CatchBackend + ?Sized> {
    backend: Arc<B>,
    config: Arc<SyncConfig>,
}

impl<B: CatchBackend + ?Sized> MediaChannel<B> {
    /// Create a channel over `backend`.
    pub fn new(backend: Arc<B>, config: Arc<SyncConfig>) -> Self {
        Self { backend, config }
    }

    /// Collect the parts to send.
    ///
    /// Under `MediaGapPolicy::Omit` the result may hold no parts at all.
    ///
    /// # Errors
    /// - `LocalMediaMissing` if a file is missing under `MediaGapPolicy::Reject`
    pub async fn parts(&self, record: &CatchRecord) -> Result<(Vec<MediaPart>, MediaUpload)> {
        let mut parts = Vec::new();
        let mut upload = MediaUpload::default();

        for field in MediaField::ALL {
            let path = record.media_path(field);
            let exists = tokio::fs::try_exists(path).await.unwrap_or(false);
            if !exists {
                match self.config.media_gap_policy {
                    MediaGapPolicy::Omit => {
                        warn!(
                            "Media {} of {} missing at {}; omitting part",
                            field,
                            record.code,
                            path.display()
                        );
                        upload.omitted.push(field);
                        continue;
                    }
                    MediaGapPolicy::Reject => {
                        return Err(Error::LocalMediaMissing(path.display().to_string()));
                    }
                }
            }

            parts.push(MediaPart {
                field,
                file_name: part_file_name(record, field),
                content_type: content_type_for(path),
                path: path.to_path_buf(),
            });
            upload.sent.push(field);
        }

        if parts.is_empty() {
            warn!("No media files left for {}; uploading an empty form", record.code);
        }
        Ok((parts, upload))
    }

    /// Upload the record's media files.
    pub async fn upload(&self, record: &CatchRecord) -> Result<MediaUpload> {
        let variant = resolve_variant(&self.config, record)?;
        let (parts, upload) = self.parts(record).await?;
        debug!(
            "Uploading {} media parts of {} to {} via {}",
            parts.len(),
            record.code,
            variant,
            self.backend.name()
        );
        self.backend
            .upload_media(variant, &record.code, parts)
            .await?;
        Ok(upload)
    }
}
