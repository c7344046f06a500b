//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::log_sink::DEFAULT_LOG_CAPACITY;
use super::models::QueueConfig;
use super::settings::{PresetStore, DEFAULT_PRESET};

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Main application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub downloader: DownloaderConfig,
    pub logging: LoggingConfig,
    pub presets: PresetStore,
    /// Preset applied to newly enqueued sources
    pub active_preset: String,
}

/// Where and how the yt-dlp adapter runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloaderConfig {
    /// yt-dlp executable, looked up on PATH when not absolute
    pub ytdlp_path: PathBuf,
    /// Passed as `--ffmpeg-location` when set
    pub ffmpeg_location: Option<PathBuf>,
    pub download_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: String, // "error", "warn", "info", "debug", "trace"
    /// Entries kept by the in-memory log sink
    pub history_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            downloader: DownloaderConfig::default(),
            logging: LoggingConfig::default(),
            presets: PresetStore::default(),
            active_preset: DEFAULT_PRESET.to_string(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
            download_directory: PathBuf::from("downloads"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            history_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform config directory, creating the
    /// default file if it does not exist yet
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save_to(&config_path)?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: AppConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

        tracing::info!("Loaded configuration from: {:?}", path);
        Ok(config)
    }

    /// Save configuration to the platform config directory
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Saved configuration to: {:?}", path);
        Ok(())
    }

    /// Load from `path` (or the default location), falling back to defaults
    /// when the file is unreadable or invalid
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let loaded = match path {
            Some(path) if path.exists() => Self::load_from(path),
            Some(path) => {
                let config = Self::default();
                config.save_to(path).map(|_| config)
            }
            None => Self::load(),
        };

        match loaded {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(err) => {
                    tracing::warn!(
                        "Invalid configuration detected ({}), falling back to defaults",
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                tracing::warn!("Failed to load configuration: {:#}. Using defaults", err);
                Self::default()
            }
        }
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "mediaqueue", "media-queue")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.queue.concurrency_limit == 0 {
            anyhow::bail!("Concurrency limit must be greater than 0");
        }

        if self.queue.concurrency_limit > 20 {
            anyhow::bail!("Concurrency limit should not exceed 20");
        }

        if !(100..=600_000).contains(&self.queue.cancel_grace_period_ms) {
            anyhow::bail!("Cancellation grace period should be between 100ms and 10 minutes");
        }

        if self.downloader.ytdlp_path.as_os_str().is_empty() {
            anyhow::bail!("yt-dlp path must not be empty");
        }

        if self.downloader.download_directory.as_os_str().is_empty() {
            anyhow::bail!("Download directory must not be empty");
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level: must be 'error', 'warn', 'info', 'debug', or 'trace'"
            );
        }

        if self.logging.history_capacity == 0 || self.logging.history_capacity > 100_000 {
            anyhow::bail!("Log history capacity should be between 1 and 100000 entries");
        }

        self.presets
            .validate()
            .with_context(|| "Invalid presets")?;

        if self.presets.get(&self.active_preset).is_none() {
            anyhow::bail!("Active preset '{}' does not exist", self.active_preset);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::DownloadSettings;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.concurrency_limit, 4);
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = AppConfig::default();

        config.queue.concurrency_limit = 0;
        assert!(config.validate().is_err());

        config.queue.concurrency_limit = 25;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.queue.cancel_grace_period_ms = 10;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.active_preset = "missing".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.queue.concurrency_limit = 2;
        config
            .presets
            .save_preset(
                "audio",
                DownloadSettings {
                    final_ext: Some("opus".to_string()),
                    ..DownloadSettings::default()
                },
            )
            .unwrap();
        config.active_preset = "audio".to_string();

        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_falls_back() {
        let dir = tempdir().unwrap();

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert_eq!(AppConfig::load_or_default(Some(broken.as_path())), AppConfig::default());

        let mut invalid = AppConfig::default();
        invalid.queue.concurrency_limit = 0;
        let invalid_path = dir.path().join("invalid.json");
        invalid.save_to(&invalid_path).unwrap();
        assert_eq!(
            AppConfig::load_or_default(Some(invalid_path.as_path())),
            AppConfig::default()
        );

        let fresh = dir.path().join("fresh.json");
        assert_eq!(AppConfig::load_or_default(Some(fresh.as_path())), AppConfig::default());
        assert!(fresh.exists());
    }
}
