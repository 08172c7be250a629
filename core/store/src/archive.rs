//! Local archive of captured media files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use catchsync_common::{CatchDraft, Error, MediaField, RecordCode, Result};

/// Directory holding private copies of each record's media.
///
/// Files are laid out as `{root}/{code}/{field}.{ext}`. A record's directory
/// is created exclusively, so a code that already owns a directory is
/// reported as a duplicate instead of having its files overwritten.
pub struct MediaArchive {
    root: PathBuf,
}

impl MediaArchive {
    /// Open an archive rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await.map_err(Error::Io)?;
        Ok(Self { root })
    }

    /// Root directory of the archive.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the media of one record.
    pub fn record_dir(&self, code: &RecordCode) -> PathBuf {
        self.root.join(code.as_str())
    }

    /// Copy all three media files of a draft into the archive.
    ///
    /// Returns the draft with its media references replaced by the archived
    /// paths.
    ///
    /// # Errors
    /// - `DuplicateKey` if the code already owns an archive directory
    /// - `LocalMediaMissing` if a source file does not exist; nothing is left
    ///   behind in that case
    pub async fn archive_draft(&self, code: &RecordCode, draft: CatchDraft) -> Result<CatchDraft> {
        let dir = self.record_dir(code);
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::DuplicateKey(code.to_string()));
            }
            Err(e) => return Err(Error::Io(e)),
        }

        let mut archived = draft.clone();
        for field in MediaField::ALL {
            match self.copy_into(&dir, field, draft.media_path(field)).await {
                Ok(path) => archived.set_media_path(field, path),
                Err(e) => {
                    self.discard(code).await?;
                    return Err(e);
                }
            }
        }

        // The record row is committed right after this returns, so its files
        // and directory entries must already be on disk.
        if let Err(e) = sync_dir(&dir).await {
            self.discard(code).await?;
            return Err(e);
        }
        if let Err(e) = sync_dir(&self.root).await {
            self.discard(code).await?;
            return Err(e);
        }
        Ok(archived)
    }

    async fn copy_into(&self, dir: &Path, field: MediaField, source: &Path) -> Result<PathBuf> {
        if !fs::try_exists(source).await.unwrap_or(false) {
            return Err(Error::LocalMediaMissing(source.display().to_string()));
        }

        let dest = match source.extension().and_then(|e| e.to_str()) {
            Some(ext) => dir.join(format!("{}.{}", field.as_str(), ext.to_ascii_lowercase())),
            None => dir.join(field.as_str()),
        };

        fs::copy(source, &dest).await.map_err(Error::Io)?;
        fs::OpenOptions::new()
            .write(true)
            .open(&dest)
            .await
            .map_err(Error::Io)?
            .sync_all()
            .await
            .map_err(Error::Io)?;
        debug!("Archived {} -> {}", source.display(), dest.display());
        Ok(dest)
    }

    /// Remove a record's archived media.
    pub async fn discard(&self, code: &RecordCode) -> Result<()> {
        let dir = self.record_dir(code);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to remove archived media {}: {}", dir.display(), e);
                Err(Error::Io(e))
            }
        }
    }
}

/// Flush a directory's entries to disk.
async fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    fs::File::open(dir)
        .await
        .map_err(Error::Io)?
        .sync_all()
        .await
        .map_err(Error::Io)?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn fixture(dir: &TempDir) -> CatchDraft {
        let card = dir.path().join("IMG_0001.JPG");
        let fish = dir.path().join("IMG_0002.jpg");
        let video = dir.path().join("VID_0003.mp4");
        fs::write(&card, b"card").await.unwrap();
        fs::write(&fish, b"fish").await.unwrap();
        fs::write(&video, b"video").await.unwrap();

        CatchDraft {
            team: "Barracudas".to_string(),
            category: "boat".to_string(),
            modality: "trolling".to_string(),
            registered_by: "inspector-7".to_string(),
            species_id: String::new(),
            card_number: "C-0042".to_string(),
            size: 42.0,
            total_points: 84.0,
            card_image: card,
            fish_image: fish,
            fish_video: video,
            latitude: 0.0,
            longitude: 0.0,
        }
    }

    #[tokio::test]
    async fn test_archive_draft_rewrites_paths() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let archive = MediaArchive::new(root.path()).await.unwrap();
        let code = RecordCode::new("AB1234").unwrap();

        let archived = archive
            .archive_draft(&code, fixture(&src).await)
            .await
            .unwrap();

        let dir = root.path().join("AB1234");
        assert_eq!(archived.card_image, dir.join("card_image.jpg"));
        assert_eq!(archived.fish_image, dir.join("fish_image.jpg"));
        assert_eq!(archived.fish_video, dir.join("fish_video.mp4"));
        assert_eq!(fs::read(&archived.fish_video).await.unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_archive_rejects_existing_code() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let archive = MediaArchive::new(root.path()).await.unwrap();
        let code = RecordCode::new("AB1234").unwrap();

        archive
            .archive_draft(&code, fixture(&src).await)
            .await
            .unwrap();
        let err = archive
            .archive_draft(&code, fixture(&src).await)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateKey(_)));
        assert!(root.path().join("AB1234/card_image.jpg").exists());
    }

    #[tokio::test]
    async fn test_missing_source_cleans_up() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let archive = MediaArchive::new(root.path()).await.unwrap();
        let code = RecordCode::new("AB1234").unwrap();

        let mut draft = fixture(&src).await;
        draft.fish_video = src.path().join("missing.mp4");
        let err = archive.archive_draft(&code, draft).await.unwrap_err();

        assert!(matches!(err, Error::LocalMediaMissing(_)));
        assert!(!archive.record_dir(&code).exists());
    }

    #[tokio::test]
    async fn test_archived_copy_is_complete() {
        let src = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        let archive = MediaArchive::new(root.path()).await.unwrap();
        let code = RecordCode::new("AB1234").unwrap();

        let draft = fixture(&src).await;
        let video: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        fs::write(&draft.fish_video, &video).await.unwrap();

        let archived = archive.archive_draft(&code, draft).await.unwrap();

        assert_eq!(fs::read(&archived.fish_video).await.unwrap(), video);
        sync_dir(root.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_dir_missing_directory() {
        let root = TempDir::new().unwrap();
        let result = sync_dir(&root.path().join("gone")).await;
        if cfg!(unix) {
            assert!(matches!(result, Err(Error::Io(_))));
        } else {
            assert!(result.is_ok());
        }
    }
}
