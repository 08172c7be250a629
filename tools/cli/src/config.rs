//! CLI configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use catchsync_sync::SyncConfig;

/// Settings stored in the JSON config file.
///
/// Relative paths are resolved against the directory holding the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database holding the catch records.
    pub database_path: PathBuf,
    /// Root of the media archive.
    pub media_dir: PathBuf,
    /// Sync settings.
    pub sync: SyncConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("catchsync.db"),
            media_dir: PathBuf::from("media"),
            sync: SyncConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load a config file and resolve its relative paths.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.database_path = resolve(base, &config.database_path);
        config.media_dir = resolve(base, &config.media_dir);
        config.sync.backends = config.sync.backends.with_env_overrides();
        Ok(config)
    }

    /// Write the config file, refusing to overwrite unless `force` is set.
    pub fn save(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
