//! Configuration module for onedrift.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation, and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for onedrift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub drive: DriveConfig,
    pub sync: SyncConfig,
    pub filters: FilterConfig,
    pub transfers: TransferConfig,
    pub safety: SafetyConfig,
    pub logging: LoggingConfig,
}

/// The drive this instance synchronizes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Canonical drive identifier, e.g. `personal:user@example.com`.
    pub canonical: String,
    /// The drive's Graph identifier (normalized at load).
    pub id: String,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory of the local mirror.
    pub root: PathBuf,
    /// Days a tombstone row is kept before physical purge.
    pub tombstone_retention_days: u32,
}

/// Local scan skip filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Skip files and directories whose name starts with a dot.
    pub skip_dotfiles: bool,
    /// Glob patterns for file names to skip.
    pub skip_files: Vec<String>,
    /// Glob patterns for directory names to skip.
    pub skip_dirs: Vec<String>,
    /// Skip files larger than this many bytes (0 = no limit).
    pub max_file_size: u64,
}

/// Transfer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Parallel download workers.
    pub download_workers: usize,
    /// Parallel upload workers.
    pub upload_workers: usize,
    /// Files at or below this size use a single simple-upload request.
    pub simple_upload_threshold: u64,
    /// Chunk size for resumable upload sessions.
    pub upload_chunk_size: u64,
    /// Whole-download retries after a hash mismatch (capped at 100).
    pub max_hash_retries: u32,
    /// Days before an on-disk upload session file is swept away.
    pub stale_session_age_days: u32,
}

/// Safety gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// Minimum number of planned deletes before the big-delete gate can trip.
    pub big_delete_min_items: usize,
    /// Planned deletes as a percentage of the baseline that trips the gate.
    pub big_delete_percentage: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/onedrift/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("onedrift")
            .join("config.yaml")
    }

    /// Platform-appropriate base data directory.
    ///
    /// Typically `$XDG_DATA_HOME/onedrift` on Linux or
    /// `~/Library/Application Support/onedrift` on macOS. Holds `state.db`
    /// and the `upload-sessions/` directory.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("onedrift")
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("OneDrive"),
            tombstone_retention_days: 30,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_workers: 8,
            upload_workers: 8,
            // Graph simple upload limit is 4 MiB.
            simple_upload_threshold: 4 * 1024 * 1024,
            // Multiple of 320 KiB as the upload session API requires.
            upload_chunk_size: 10 * 1024 * 1024,
            max_hash_retries: 2,
            stale_session_age_days: 7,
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            big_delete_min_items: 10,
            big_delete_percentage: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transfers.download_workers, 8);
        assert_eq!(config.transfers.upload_workers, 8);
        assert_eq!(config.safety.big_delete_min_items, 10);
        assert_eq!(config.safety.big_delete_percentage, 50);
        assert_eq!(config.sync.tombstone_retention_days, 30);
        assert_eq!(config.transfers.max_hash_retries, 2);
        assert_eq!(config.transfers.stale_session_age_days, 7);
    }

    #[test]
    fn test_chunk_size_multiple_of_320kib() {
        let config = TransferConfig::default();
        assert_eq!(config.upload_chunk_size % (320 * 1024), 0);
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "filters:\n  skip_dotfiles: true\n  skip_dirs: [\"node_modules\"]\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.filters.skip_dotfiles);
        assert_eq!(config.filters.skip_dirs, vec!["node_modules".to_string()]);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.transfers.download_workers, 8);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(config.safety.big_delete_min_items, 10);
    }
}
