//! Application configuration.

use std::path::PathBuf;

use markfree_media_model::region::RegionPresets;
use serde::{Deserialize, Serialize};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Processing parameters shared by every job.
    #[serde(default)]
    pub processing: ProcessingDefaults,

    /// Built-in region sets, picked by the caller per source orientation.
    #[serde(default)]
    pub regions: RegionPresets,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default processing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingDefaults {
    /// Blur radius in pixels applied inside each region.
    pub blur_radius: u32,

    /// How many times the blur is compounded per region.
    pub blur_passes: u32,

    /// Encoder chunk cadence in milliseconds.
    pub chunk_interval_ms: u64,

    /// Nominal frame rate of the captured surface stream.
    pub capture_fps: u32,

    /// Sample rate the relayed audio is decoded to.
    pub audio_sample_rate: u32,

    /// Channel count the relayed audio is decoded to.
    pub audio_channels: u32,

    /// Interval between playback position updates.
    pub time_update_interval_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "markfree=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            processing: ProcessingDefaults::default(),
            regions: RegionPresets::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ProcessingDefaults {
    fn default() -> Self {
        Self {
            blur_radius: 25,
            blur_passes: 3,
            chunk_interval_ms: 1000,
            capture_fps: 30,
            audio_sample_rate: 48000,
            audio_channels: 2,
            time_update_interval_ms: 250,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("markfree").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_filter() {
        let defaults = ProcessingDefaults::default();
        assert_eq!(defaults.blur_radius, 25);
        assert_eq!(defaults.blur_passes, 3);
        assert_eq!(defaults.chunk_interval_ms, 1000);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "processing": { "blur_passes": 5 } }"#).unwrap();
        assert_eq!(config.processing.blur_passes, 5);
        assert_eq!(config.processing.blur_radius, 25);
        assert_eq!(config.regions.landscape.len(), 3);
        assert_eq!(config.logging.level, "info");
    }
}
