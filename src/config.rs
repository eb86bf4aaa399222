//! Application configuration
//!
//! Loaded once from TOML at startup. The track list is static for the
//! engine's lifetime.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Static description of one stem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Display name, also the key external viewers use for the track
    pub name: String,
    /// Source reference handed to the asset loader
    pub source: String,
    /// Display color (CSS-style hex)
    #[serde(default = "default_color")]
    pub color: String,
}

impl TrackDescriptor {
    pub fn new(name: impl Into<String>, source: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            color: color.into(),
        }
    }
}

fn default_color() -> String {
    "#ffffff".to_string()
}

/// Mixing and transport defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Volume every track starts with and returns to on reset
    pub default_volume: f32,
    /// Pan every track starts with and returns to on reset
    pub default_pan: f32,
    /// Master volume at startup and after reset
    pub master_volume: f32,
    /// Position tick period while playing
    pub tick_interval_ms: u64,
    /// Step used by the previous/next controls
    pub skip_seconds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_volume: DEFAULT_TRACK_VOLUME,
            default_pan: 0.0,
            master_volume: DEFAULT_MASTER_VOLUME,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            skip_seconds: DEFAULT_SKIP_SECONDS,
        }
    }
}

/// Output device settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device ID as reported by the device list; default device when unset
    pub device_id: Option<String>,
    pub sample_rate: Option<u32>,
    pub buffer_size: Option<u32>,
}

/// Full application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Directory relative sources are resolved against
    #[serde(default)]
    pub asset_root: Option<PathBuf>,
    pub tracks: Vec<TrackDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            output: OutputConfig::default(),
            asset_root: None,
            tracks: vec![
                TrackDescriptor::new("Violino", "audio/Violino.mp3", "#ea00ffff"),
                TrackDescriptor::new("Clarinete", "audio/Clarinete.mp3", "#fbff00ff"),
                TrackDescriptor::new("Cello", "audio/Cello.mp3", "#09ff00ff"),
                TrackDescriptor::new("Baixo", "audio/Baixo.mp3", "#00e1ffff"),
            ],
        }
    }
}

impl AppConfig {
    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&text)?;
        if config.asset_root.is_none() {
            config.asset_root = path.parent().map(Path::to_path_buf);
        }
        Ok(config)
    }

    /// Load from the per-user config location, falling back to defaults
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/stem-mixer/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "stem-mixer").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(Error::Config("at least one track is required".into()));
        }
        if self.tracks.len() > MAX_TRACKS {
            return Err(Error::Config(format!(
                "{} tracks configured, at most {} supported",
                self.tracks.len(),
                MAX_TRACKS
            )));
        }

        let mut names = HashSet::new();
        for track in &self.tracks {
            if track.name.trim().is_empty() {
                return Err(Error::Config("track names must not be empty".into()));
            }
            if !names.insert(track.name.as_str()) {
                return Err(Error::Config(format!("duplicate track name: {}", track.name)));
            }
        }

        let engine = &self.engine;
        if !(0.0..=1.0).contains(&engine.default_volume) {
            return Err(Error::Config(format!(
                "default_volume {} outside [0, 1]",
                engine.default_volume
            )));
        }
        if !(-1.0..=1.0).contains(&engine.default_pan) {
            return Err(Error::Config(format!(
                "default_pan {} outside [-1, 1]",
                engine.default_pan
            )));
        }
        if !(0.0..=1.0).contains(&engine.master_volume) {
            return Err(Error::Config(format!(
                "master_volume {} outside [0, 1]",
                engine.master_volume
            )));
        }
        if engine.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".into()));
        }
        if !(engine.skip_seconds.is_finite() && engine.skip_seconds > 0.0) {
            return Err(Error::Config("skip_seconds must be positive".into()));
        }
        Ok(())
    }

    /// Directory relative sources resolve against
    pub fn asset_root(&self) -> PathBuf {
        self.asset_root.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tracks.len(), 4);
        assert_eq!(config.engine.default_volume, 0.7);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::from_toml(
            r#"
            [[tracks]]
            name = "Bass"
            source = "bass.wav"
            "#,
        )
        .unwrap();

        assert_eq!(config.tracks[0].color, "#ffffff");
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.output.device_id, None);
    }

    #[test]
    fn test_toml_roundtrip_keeps_engine_settings() {
        let mut config = AppConfig::default();
        config.engine.skip_seconds = 5.0;
        config.output.device_id = Some("output:Speakers".into());

        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let mut config = AppConfig::default();
        config.tracks.push(config.tracks[0].clone());
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_out_of_range_defaults() {
        let mut config = AppConfig::default();
        config.engine.default_pan = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.engine.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_track_list() {
        let config = AppConfig {
            tracks: Vec::new(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
