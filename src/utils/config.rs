//! Configuration management for ccsync
//!
//! This module handles loading and managing configuration from config files
//! and environment variables. Later sources are merged key by key over
//! earlier ones, so a user file only needs the values it changes.

use crate::audio::RampType;
use crate::decoder::PixelLayout;
use crate::utils::error::{IntoPlaybackError, PlaybackError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Packet source configuration
    pub demuxer: DemuxerConfig,

    /// Video pipeline configuration
    pub video: VideoConfig,

    /// Audio output configuration
    pub audio: AudioConfig,

    /// Command thread configuration
    pub playback: PlaybackConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Demuxer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxerConfig {
    /// Capacity of each per-stream packet queue
    pub packet_queue_capacity: usize,
}

/// Video pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Decoded frames buffered ahead of presentation (4 to 8)
    pub frame_queue_capacity: usize,

    /// A pending frame is released once it is at most this far ahead of the clock
    pub release_threshold_ms: f64,

    /// Layout of the planes handed to the presentation layer
    pub pixel_format: PixelLayout,

    /// Codec threads (0 = let the codec decide)
    pub decoder_threads: usize,
}

/// Which device binding receives decoded audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Default output device through cpal
    Device,

    /// Real-time paced sink that discards samples
    Clocked,
}

/// Audio configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Decode and play audio when the media has it
    pub enabled: bool,

    /// Initial volume (0.0 - 1.0)
    pub volume: f32,

    /// Ring buffer length in seconds of output audio
    pub ring_seconds: f64,

    /// Size of one device pull chunk in bytes
    pub callback_chunk_bytes: usize,

    /// Throttle watermark as a fraction of the ring
    pub target_ratio: f64,

    /// Resume watermark as a fraction of the target
    pub resume_ratio: f64,

    /// Output binding
    pub sink: SinkKind,

    /// Gain curve used when the volume changes
    pub ramp_type: RampType,
}

/// Command thread configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Maximum queued commands before the oldest is dropped
    pub command_queue_capacity: usize,

    /// Collapse repeated volume, speed and seek commands in place
    pub coalesce_commands: bool,

    /// Snapshot refresh interval while idle
    pub tick_interval_ms: u64,

    /// Initial playback speed
    pub speed: f64,
}

/// General application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Start playing as soon as media is opened
    pub auto_play: bool,
}

impl Default for DemuxerConfig {
    fn default() -> Self {
        Self {
            packet_queue_capacity: 256,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: 4,
            release_threshold_ms: 2.0,
            pixel_format: PixelLayout::Rgba,
            decoder_threads: 0,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 1.0,
            ring_seconds: 1.0,
            callback_chunk_bytes: 4096,
            target_ratio: 0.75,
            resume_ratio: 0.5,
            sink: SinkKind::Device,
            ramp_type: RampType::Linear,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            command_queue_capacity: 64,
            coalesce_commands: true,
            tick_interval_ms: 20,
            speed: 1.0,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            auto_play: false,
        }
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/ccsync/config.toml on Linux)
    /// 3. User config file (~/.config/ccsync/config.toml on Linux)
    /// 4. Environment variables (CCSYNC_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config.merge_from_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config.merge_from_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        log::debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Load defaults, merge a single explicit file, then environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PlaybackError::NotFound(path.display().to_string()));
        }

        let mut config = Self::default();
        config.merge_from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| PlaybackError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).config_err("Failed to create config directory")?;
        }

        let toml = toml::to_string_pretty(self).config_err("Failed to serialize config")?;
        std::fs::write(path, toml).config_err("Failed to write config file")?;

        Ok(())
    }

    /// Merge configuration from a TOML file over the current values
    fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path).config_err("Failed to read config file")?;
        self.merge_from_str(&contents)
    }

    fn merge_from_str(&mut self, contents: &str) -> Result<()> {
        let overlay: toml::Value = toml::from_str(contents).config_err("Failed to parse config file")?;
        let mut base = toml::Value::try_from(&*self).config_err("Failed to encode current config")?;

        merge_values(&mut base, overlay);

        *self = base.try_into().config_err("Invalid config value")?;
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Example: CCSYNC_AUDIO_VOLUME=0.5
        if let Some(volume) = lookup("CCSYNC_AUDIO_VOLUME") {
            self.audio.volume = volume.parse()
                .map_err(|_| PlaybackError::Config("Invalid CCSYNC_AUDIO_VOLUME".to_string()))?;
        }

        if let Some(enabled) = lookup("CCSYNC_AUDIO_ENABLED") {
            self.audio.enabled = enabled.parse()
                .map_err(|_| PlaybackError::Config("Invalid CCSYNC_AUDIO_ENABLED".to_string()))?;
        }

        if let Some(sink) = lookup("CCSYNC_AUDIO_SINK") {
            self.audio.sink = match sink.as_str() {
                "device" => SinkKind::Device,
                "clocked" => SinkKind::Clocked,
                _ => return Err(PlaybackError::Config("Invalid CCSYNC_AUDIO_SINK".to_string())),
            };
        }

        if let Some(ramp) = lookup("CCSYNC_AUDIO_RAMP") {
            self.audio.ramp_type = match ramp.as_str() {
                "linear" => RampType::Linear,
                "exponential" => RampType::Exponential,
                "scurve" => RampType::SCurve,
                _ => return Err(PlaybackError::Config("Invalid CCSYNC_AUDIO_RAMP".to_string())),
            };
        }

        if let Some(speed) = lookup("CCSYNC_PLAYBACK_SPEED") {
            self.playback.speed = speed.parse()
                .map_err(|_| PlaybackError::Config("Invalid CCSYNC_PLAYBACK_SPEED".to_string()))?;
        }

        if let Some(capacity) = lookup("CCSYNC_VIDEO_QUEUE") {
            self.video.frame_queue_capacity = capacity.parse()
                .map_err(|_| PlaybackError::Config("Invalid CCSYNC_VIDEO_QUEUE".to_string()))?;
        }

        if let Some(log_level) = lookup("CCSYNC_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.demuxer.packet_queue_capacity == 0 {
            return Err(PlaybackError::Config("Packet queue capacity must be non-zero".to_string()));
        }

        if !(4..=8).contains(&self.video.frame_queue_capacity) {
            return Err(PlaybackError::Config("Frame queue capacity must be between 4 and 8".to_string()));
        }

        if !(self.video.release_threshold_ms >= 0.0) {
            return Err(PlaybackError::Config("Release threshold must be non-negative".to_string()));
        }

        if !(0.0..=1.0).contains(&self.audio.volume) {
            return Err(PlaybackError::Config("Audio volume must be between 0.0 and 1.0".to_string()));
        }

        if !(self.audio.ring_seconds > 0.0) || self.audio.callback_chunk_bytes == 0 {
            return Err(PlaybackError::Config("Audio ring and chunk sizes must be positive".to_string()));
        }

        let ratio_ok = |r: f64| r > 0.0 && r <= 1.0;
        if !ratio_ok(self.audio.target_ratio) || !ratio_ok(self.audio.resume_ratio) {
            return Err(PlaybackError::Config("Watermark ratios must be in (0, 1]".to_string()));
        }

        if !(0.25..=2.0).contains(&self.playback.speed) {
            return Err(PlaybackError::Config("Playback speed must be between 0.25 and 2.0".to_string()));
        }

        if self.playback.command_queue_capacity == 0 || self.playback.tick_interval_ms == 0 {
            return Err(PlaybackError::Config("Command queue and tick interval must be non-zero".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(PlaybackError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/ccsync/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("ccsync").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/ccsync/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ccsync").join("config.toml"))
    }
}

/// Recursively overlay `overlay` onto `base`; tables merge, everything else replaces
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.demuxer.packet_queue_capacity, 256);
        assert_eq!(config.video.frame_queue_capacity, 4);
        assert_eq!(config.audio.volume, 1.0);
        assert_eq!(config.playback.command_queue_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.video.frame_queue_capacity = 3;
        assert!(config.validate().is_err());

        config.video.frame_queue_capacity = 8;
        config.audio.volume = 1.5;
        assert!(config.validate().is_err());

        config.audio.volume = 0.5;
        config.playback.speed = 3.0;
        assert!(config.validate().is_err());

        config.playback.speed = 1.0;
        config.general.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let mut config = Config::default();
        config.merge_from_str("[audio]\nvolume = 0.25\n\n[video]\npixel_format = \"yuv420p\"\n").unwrap();

        assert_eq!(config.audio.volume, 0.25);
        assert_eq!(config.video.pixel_format, PixelLayout::Yuv420p);
        // untouched keys keep their previous values
        assert_eq!(config.audio.callback_chunk_bytes, 4096);
        assert_eq!(config.demuxer.packet_queue_capacity, 256);
    }

    #[test]
    fn test_ramp_type_from_file() {
        let mut config = Config::default();
        assert_eq!(config.audio.ramp_type, RampType::Linear);

        config.merge_from_str("[audio]\nramp_type = \"scurve\"\n").unwrap();
        assert_eq!(config.audio.ramp_type, RampType::SCurve);

        assert!(config.merge_from_str("[audio]\nramp_type = \"cubic\"\n").is_err());
    }

    #[test]
    fn test_later_file_wins() {
        let mut config = Config::default();
        config.merge_from_str("[playback]\nspeed = 1.5\ncoalesce_commands = false\n").unwrap();
        config.merge_from_str("[playback]\nspeed = 0.5\n").unwrap();

        assert_eq!(config.playback.speed, 0.5);
        assert!(!config.playback.coalesce_commands);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CCSYNC_AUDIO_VOLUME", "0.3"),
            ("CCSYNC_AUDIO_SINK", "clocked"),
            ("CCSYNC_AUDIO_RAMP", "exponential"),
            ("CCSYNC_LOG_LEVEL", "trace"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.audio.volume, 0.3);
        assert_eq!(config.audio.sink, SinkKind::Clocked);
        assert_eq!(config.audio.ramp_type, RampType::Exponential);
        assert_eq!(config.general.log_level, "trace");

        let result = config.apply_overrides(|key| {
            (key == "CCSYNC_PLAYBACK_SPEED").then(|| "fast".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.audio.sink = SinkKind::Clocked;
        config.audio.ramp_type = RampType::SCurve;
        config.video.frame_queue_capacity = 6;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.audio.sink, SinkKind::Clocked);
        assert_eq!(loaded.audio.ramp_type, RampType::SCurve);
        assert_eq!(loaded.video.frame_queue_capacity, 6);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load_from(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(PlaybackError::NotFound(_))));
    }
}
