//! Application configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoryreelError, StoryreelResult};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where exported files are written when no path is given.
    pub output_dir: PathBuf,

    /// Default export settings.
    pub export: ExportDefaults,

    /// Bounded waits for network and media operations.
    pub timeouts: TimeoutConfig,

    /// Asset fetching behaviour.
    pub fetch: FetchConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Output frame rate.
    pub fps: u32,

    /// Audio frames (per channel) per encoder chunk.
    pub audio_chunk_frames: usize,

    /// Encoder queue depth above which the renderer pauses.
    pub max_pending_frames: usize,

    /// Yield to the runtime at least every N frames.
    pub yield_interval_frames: u32,

    /// Yield to the runtime at least every N milliseconds.
    pub yield_interval_ms: u64,

    /// Extra whole-run attempts after a retryable failure.
    pub max_retries: u32,

    /// Scene length used when nothing else determines one.
    pub fallback_scene_secs: f64,

    /// Letterbox / gap fill color (`#rrggbb`).
    pub fill_color: String,

    /// Force a device class instead of detecting it (`desktop` or `constrained`).
    pub device_class: Option<String>,
}

/// Timeouts, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub fetch_secs: f64,
    pub metadata_secs: f64,
    pub seek_secs: f64,
    pub backpressure_secs: f64,
    pub upload_secs: f64,
}

/// Asset fetching settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// `Origin` header sent on cross-origin requests.
    pub origin: String,

    /// User agent for HTTP requests.
    pub user_agent: String,

    /// Number of scenes fetched ahead of the one being rendered.
    pub lookahead_scenes: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "storyreel=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            audio_chunk_frames: 1024,
            max_pending_frames: 10,
            yield_interval_frames: 15,
            yield_interval_ms: 50,
            max_retries: 2,
            fallback_scene_secs: 5.0,
            fill_color: "#000000".to_string(),
            device_class: None,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: 30.0,
            metadata_secs: 15.0,
            seek_secs: 5.0,
            backpressure_secs: 30.0,
            upload_secs: 60.0,
        }
    }
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration {
        secs(self.fetch_secs)
    }

    pub fn metadata(&self) -> Duration {
        secs(self.metadata_secs)
    }

    pub fn seek(&self) -> Duration {
        secs(self.seek_secs)
    }

    pub fn backpressure(&self) -> Duration {
        secs(self.backpressure_secs)
    }

    pub fn upload(&self) -> Duration {
        secs(self.upload_secs)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            user_agent: format!("storyreel/{}", env!("CARGO_PKG_VERSION")),
            lookahead_scenes: 2,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self {
            output_dir: default_output_dir(),
            ..Self::default()
        }
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> StoryreelResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Reject values the export pipeline cannot work with.
    pub fn validate(&self) -> StoryreelResult<()> {
        let export = &self.export;
        if export.fps == 0 || export.fps > 120 {
            return Err(StoryreelError::config(format!(
                "fps must be in 1..=120, got {}",
                export.fps
            )));
        }
        if export.audio_chunk_frames == 0 {
            return Err(StoryreelError::config("audio_chunk_frames must be positive"));
        }
        if export.max_pending_frames == 0 {
            return Err(StoryreelError::config("max_pending_frames must be positive"));
        }
        if !(export.fallback_scene_secs.is_finite() && export.fallback_scene_secs > 0.0) {
            return Err(StoryreelError::config(
                "fallback_scene_secs must be a positive number",
            ));
        }
        Ok(())
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
    base.join("storyreel").join("config.json")
}

/// Default export directory.
fn default_output_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("storyreel").join("exports")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.export.fps, 30);
        assert_eq!(config.export.max_pending_frames, 10);
        assert_eq!(config.export.max_retries, 2);
        assert_eq!(config.timeouts.fetch(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"export":{"fps":24},"logging":{"json":true}}"#).unwrap();
        assert_eq!(config.export.fps, 24);
        assert_eq!(config.export.audio_chunk_frames, 1024);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_fps_rejected() {
        let mut config = AppConfig::default();
        config.export.fps = 0;
        assert!(matches!(
            config.validate(),
            Err(StoryreelError::Config { .. })
        ));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.export.fill_color = "#101820".to_string();
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.export.fill_color, "#101820");
    }

    #[test]
    fn test_negative_timeout_clamps_to_zero() {
        let timeouts = TimeoutConfig {
            seek_secs: -1.0,
            ..TimeoutConfig::default()
        };
        assert_eq!(timeouts.seek(), Duration::ZERO);
    }
}
