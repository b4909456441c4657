//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory where finished recordings are written.
    pub output_dir: PathBuf,

    /// Default recording settings.
    pub recording: RecordingDefaults,

    /// Transcode engine settings.
    pub transcode: TranscodeConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default recording parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingDefaults {
    /// Composite surface width in pixels.
    pub width: u32,

    /// Composite surface height in pixels.
    pub height: u32,

    /// Compositor tick rate and encoder frame rate.
    pub fps: u32,

    /// Delivery format: "native" (WebM) or "alternate" (MP4).
    pub delivery_format: String,

    /// Whether the camera overlay is mirrored by default.
    pub mirror_camera: bool,

    /// Whether to multiplex microphone audio into the recording.
    pub capture_microphone: bool,
}

/// Settings for the ffmpeg-backed transcode engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// ffmpeg binary name or path.
    pub ffmpeg_path: String,

    /// ffprobe binary name or path.
    pub ffprobe_path: String,

    /// Video codec for the alternate format.
    pub video_codec: String,

    /// Encoder speed preset.
    pub preset: String,

    /// Constant rate factor (lower = higher quality).
    pub crf: u32,

    /// Audio codec for the alternate format.
    pub audio_codec: String,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Scratch directory for engine intermediates. Defaults to the system temp dir.
    pub work_dir: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "pipcast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            recording: RecordingDefaults::default(),
            transcode: TranscodeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordingDefaults {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            delivery_format: "native".to_string(),
            mirror_camera: true,
            capture_microphone: true,
        }
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
            work_dir: None,
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
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
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

    /// Save config as pretty JSON, creating parent directories.
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), std::io::Error> {
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
    base.join("pipcast").join("config.json")
}

/// Default recordings directory.
fn default_output_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("pipcast").join("recordings")
}
