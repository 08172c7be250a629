//! Catch record model and per-record sync state.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{BackendVariant, MediaField, RecordCode};
use crate::{Error, Result};

/// Coerce a user-entered size into a number.
///
/// Accepts surrounding whitespace and a comma as decimal separator.
///
/// # Errors
/// - Returns error if the value is not a finite, non-negative number
pub fn coerce_size(raw: &str) -> Result<f64> {
    let normalized = raw.trim().replace(',', ".");
    let value: f64 = normalized
        .parse()
        .map_err(|_| Error::InvalidInput(format!("Size is not a number: {:?}", raw)))?;
    check_size(value)
}

fn check_size(value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidInput(format!(
            "Size must be a finite non-negative number, got {}",
            value
        )));
    }
    Ok(value)
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    let value = match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => check_size(n),
        NumberOrText::Text(s) => coerce_size(&s),
    };
    value.map_err(serde::de::Error::custom)
}

/// Field values supplied by the capture flow before a record is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchDraft {
    pub team: String,
    pub category: String,
    #[serde(default)]
    pub modality: String,
    pub registered_by: String,
    #[serde(default)]
    pub species_id: String,
    pub card_number: String,
    #[serde(deserialize_with = "deserialize_size")]
    pub size: f64,
    #[serde(default)]
    pub total_points: f64,
    pub card_image: PathBuf,
    pub fish_image: PathBuf,
    pub fish_video: PathBuf,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
}

impl CatchDraft {
    /// Check that every field required by the record's backend is populated.
    ///
    /// Variant B additionally requires a species.
    pub fn validate(&self, variant: BackendVariant) -> Result<()> {
        let mut missing = Vec::new();
        let required = [
            ("team", &self.team),
            ("category", &self.category),
            ("registered_by", &self.registered_by),
            ("card_number", &self.card_number),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        if variant == BackendVariant::Shore && self.species_id.trim().is_empty() {
            missing.push("species_id");
        }
        for field in MediaField::ALL {
            if self.media_path(field).as_os_str().is_empty() {
                missing.push(field.as_str());
            }
        }
        if !missing.is_empty() {
            return Err(Error::InvalidInput(format!(
                "Missing required fields for {}: {}",
                variant,
                missing.join(", ")
            )));
        }
        check_size(self.size)?;
        Ok(())
    }

    /// Local path of one media asset.
    pub fn media_path(&self, field: MediaField) -> &Path {
        match field {
            MediaField::CardImage => &self.card_image,
            MediaField::FishImage => &self.fish_image,
            MediaField::FishVideo => &self.fish_video,
        }
    }

    /// Replace the local path of one media asset.
    pub fn set_media_path(&mut self, field: MediaField, path: PathBuf) {
        match field {
            MediaField::CardImage => self.card_image = path,
            MediaField::FishImage => self.fish_image = path,
            MediaField::FishVideo => self.fish_video = path,
        }
    }
}

/// One scoring entry as held by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchRecord {
    pub code: RecordCode,
    pub team: String,
    pub category: String,
    pub modality: String,
    pub registered_by: String,
    pub species_id: String,
    pub card_number: String,
    pub size: f64,
    pub total_points: f64,
    pub card_image: PathBuf,
    pub fish_image: PathBuf,
    pub fish_video: PathBuf,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    pub synchronized_data: bool,
    pub synchronized_media: bool,
}

impl CatchRecord {
    /// Build an unsynchronized record from a draft, stamped with the current time.
    ///
    /// The timestamp is truncated to microseconds, the precision the store keeps.
    pub fn from_draft(code: RecordCode, draft: CatchDraft) -> Self {
        Self {
            code,
            team: draft.team,
            category: draft.category,
            modality: draft.modality,
            registered_by: draft.registered_by,
            species_id: draft.species_id,
            card_number: draft.card_number,
            size: draft.size,
            total_points: draft.total_points,
            card_image: draft.card_image,
            fish_image: draft.fish_image,
            fish_video: draft.fish_video,
            latitude: draft.latitude,
            longitude: draft.longitude,
            created_at: Utc::now().trunc_subsecs(6),
            synchronized_data: false,
            synchronized_media: false,
        }
    }

    /// Local path of one media asset.
    pub fn media_path(&self, field: MediaField) -> &Path {
        match field {
            MediaField::CardImage => &self.card_image,
            MediaField::FishImage => &self.fish_image,
            MediaField::FishVideo => &self.fish_video,
        }
    }

    /// Current position in the sync state machine.
    pub fn sync_state(&self) -> RecordSyncState {
        RecordSyncState::from_flags(self.synchronized_data, self.synchronized_media)
    }

    /// Whether both channels have been accepted by the backend.
    pub fn is_fully_synchronized(&self) -> bool {
        self.synchronized_data && self.synchronized_media
    }
}

/// Per-record sync state derived from the two channel flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordSyncState {
    /// Metadata not yet accepted by the backend.
    Pending,
    /// Metadata accepted, media still outstanding.
    DataSynced,
    /// Both channels accepted.
    FullySynced,
}

impl RecordSyncState {
    /// Derive the state from the stored flags.
    ///
    /// Media is never uploaded before metadata, so a media flag without a data
    /// flag is treated as still pending.
    pub fn from_flags(synchronized_data: bool, synchronized_media: bool) -> Self {
        match (synchronized_data, synchronized_media) {
            (true, true) => RecordSyncState::FullySynced,
            (true, false) => RecordSyncState::DataSynced,
            (false, _) => RecordSyncState::Pending,
        }
    }
}

/// Partial update of a record's sync flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusUpdate {
    pub synchronized_data: Option<bool>,
    pub synchronized_media: Option<bool>,
}

impl StatusUpdate {
    /// Mark the metadata channel as accepted.
    pub fn data_synced() -> Self {
        Self {
            synchronized_data: Some(true),
            synchronized_media: None,
        }
    }

    /// Mark the media channel as accepted.
    pub fn media_synced() -> Self {
        Self {
            synchronized_data: None,
            synchronized_media: Some(true),
        }
    }

    /// Whether the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.synchronized_data.is_none() && self.synchronized_media.is_none()
    }
}
