//! Sync configuration.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use catchsync_common::{BackendVariant, Error, Result};

/// Environment variable overriding the configured API key.
pub const API_KEY_ENV: &str = "CATCHSYNC_API_KEY";

/// How the media channel treats a media file that is missing on disk.
///
/// Under `Omit` the upload is still sent when every file is gone, as an empty
/// form, so a record with lost media can still finish instead of being retried
/// forever. Use `Reject` to keep such records at `DataSynced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaGapPolicy {
    /// Drop missing parts and upload the rest, even if nothing is left.
    #[default]
    Omit,
    /// Fail the media channel; the record stays pending.
    Reject,
}

/// Connection settings for the two backend APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the variant A (offshore) API.
    pub variant_a_url: String,
    /// Base URL of the variant B (shore) API.
    pub variant_b_url: String,
    /// Static service credential.
    pub api_key: String,
    /// Header carrying the credential.
    pub api_key_header: String,
    /// Path of the metadata endpoint, relative to the base URL.
    pub metadata_path: String,
    /// Path of the media endpoint, relative to the base URL.
    pub media_path: String,
    /// Upper bound for a single request, in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            variant_a_url: "http://localhost:8000/api".to_string(),
            variant_b_url: "http://localhost:8001/api".to_string(),
            api_key: String::new(),
            api_key_header: "X-Api-Key".to_string(),
            metadata_path: "fish_catch/no-media/".to_string(),
            media_path: "fish_catch/media/".to_string(),
            timeout_secs: 60,
        }
    }
}

impl BackendConfig {
    /// Base URL serving the given variant.
    pub fn base_url(&self, variant: BackendVariant) -> &str {
        match variant {
            BackendVariant::Offshore => &self.variant_a_url,
            BackendVariant::Shore => &self.variant_b_url,
        }
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.api_key = key;
            }
        }
        self
    }

    /// Check that both base URLs parse and the timeout is usable.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("variant_a_url", &self.variant_a_url),
            ("variant_b_url", &self.variant_b_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::Config(format!("{} is not a valid URL: {}", name, e)))?;
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }
        if self.api_key_header.trim().is_empty() {
            return Err(Error::Config("api_key_header cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backend endpoints and credentials.
    pub backends: BackendConfig,
    /// Category name to backend variant lookup table.
    ///
    /// Keys are lowercase; loading a config folds them and rejects names
    /// that differ only in case but map to different variants.
    #[serde(deserialize_with = "deserialize_category_table")]
    pub category_variants: HashMap<String, BackendVariant>,
    /// Treatment of missing media files.
    pub media_gap_policy: MediaGapPolicy,
    /// Whether "sync all" retries media for records whose metadata already synced.
    pub retry_media_only: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let category_variants = [
            ("boat", BackendVariant::Offshore),
            ("offshore", BackendVariant::Offshore),
            ("embarked", BackendVariant::Offshore),
            ("variant-a", BackendVariant::Offshore),
            ("bank", BackendVariant::Shore),
            ("shore", BackendVariant::Shore),
            ("beach", BackendVariant::Shore),
            ("variant-b", BackendVariant::Shore),
        ]
        .into_iter()
        .map(|(name, variant)| (name.to_string(), variant))
        .collect();

        Self {
            backends: BackendConfig::default(),
            category_variants,
            media_gap_policy: MediaGapPolicy::Omit,
            retry_media_only: true,
        }
    }
}

impl SyncConfig {
    /// Resolve which backend a category belongs to (case-insensitive).
    pub fn variant_for(&self, category: &str) -> Option<BackendVariant> {
        self.category_variants
            .get(&category.trim().to_ascii_lowercase())
            .copied()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}

fn deserialize_category_table<'de, D>(
    deserializer: D,
) -> std::result::Result<HashMap<String, BackendVariant>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, BackendVariant>::deserialize(deserializer)?;
    let mut table = HashMap::with_capacity(raw.len());
    for (name, variant) in raw {
        let key = name.trim().to_ascii_lowercase();
        if let Some(previous) = table.insert(key.clone(), variant) {
            if previous != variant {
                return Err(D::Error::custom(format!(
                    "category {:?} maps to both {} and {}",
                    key, previous, variant
                )));
            }
        }
    }
    Ok(table)
}
