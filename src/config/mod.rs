//! Application Configuration
//!
//! Pipeline tuning and paths stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Queue and drain behavior
    pub pipeline: PipelineSettings,
    /// Capture worker settings
    pub capture: CaptureSettings,
    /// Recognition worker settings
    pub recognition: RecognitionSettings,
    /// Persistence settings
    pub storage: StorageSettings,
}

/// Queue and drain behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Bounded capacity of the capture-to-recognition and
    /// recognition-to-writer queues
    pub queue_capacity: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 2000,
        }
    }
}

/// Capture-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Number of capture workers, one source session each
    pub workers: usize,
    /// Connect attempts before a worker gives up
    pub max_retries: u32,
    /// Pause between connect attempts
    pub retry_backoff_secs: u64,
    /// Pause after a per-item capture failure
    pub transient_backoff_secs: u64,
    /// Pause between consecutive fetches on one worker
    pub fetch_delay_ms: u64,
    /// How long to wait for the next raw image
    pub image_timeout_secs: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            max_retries: 3,
            retry_backoff_secs: 2,
            transient_backoff_secs: 1,
            fetch_delay_ms: 300,
            image_timeout_secs: 15,
        }
    }
}

/// Recognition-related settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    /// Number of recognition workers sharing one engine
    pub workers: usize,
    /// Path to the ONNX recognition model
    pub model_path: Option<PathBuf>,
    /// Results below this overall confidence are logged as suspect
    pub low_confidence_threshold: f32,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            model_path: None,
            low_confidence_threshold: 70.0,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database location, or the per-user data directory when unset
    pub database_path: Option<PathBuf>,
    /// Records per transaction
    pub batch_size: usize,
    /// Force a flush at least every this many records
    pub save_interval: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            batch_size: 1,
            save_interval: 15,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert_eq!(config.pipeline.queue_capacity, 2000);

        assert_eq!(config.capture.workers, 1);
        assert_eq!(config.capture.max_retries, 3);
        assert_eq!(config.capture.retry_backoff_secs, 2);
        assert_eq!(config.capture.fetch_delay_ms, 300);
        assert_eq!(config.capture.image_timeout_secs, 15);

        assert_eq!(config.recognition.workers, 1);
        assert!(config.recognition.model_path.is_none());
        assert!((config.recognition.low_confidence_threshold - 70.0).abs() < 0.01);

        assert!(config.storage.database_path.is_none());
        assert_eq!(config.storage.batch_size, 1);
        assert_eq!(config.storage.save_interval, 15);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = AppConfig::default();

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.pipeline.queue_capacity, parsed.pipeline.queue_capacity);
        assert_eq!(config.capture.fetch_delay_ms, parsed.capture.fetch_delay_ms);
        assert_eq!(config.storage.save_interval, parsed.storage.save_interval);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            "[capture]\nworkers = 4\n\n[recognition]\nworkers = 2\n",
        )
        .unwrap();

        assert_eq!(parsed.capture.workers, 4);
        assert_eq!(parsed.recognition.workers, 2);
        // Everything unspecified keeps its default.
        assert_eq!(parsed.capture.max_retries, 3);
        assert_eq!(parsed.pipeline.queue_capacity, 2000);
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.capture.workers = 3;
        config.storage.database_path = Some(PathBuf::from("/tmp/c.db"));

        save_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.capture.workers, 3);
        assert_eq!(loaded.storage.database_path, Some(PathBuf::from("/tmp/c.db")));
    }
}
