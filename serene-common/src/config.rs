//! Configuration loading and config file resolution
//!
//! Bootstrap configuration is read from a TOML file. Missing files are not
//! fatal: a warning is logged and compiled defaults are used. A file that
//! exists but cannot be parsed is a configuration error.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `SERENE_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/serene/config.toml`)
//! 4. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SERENE_CONFIG";

/// Sample rate of session audio delivered by the generator (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Channel count of session audio delivered by the generator
pub const DEFAULT_CHANNELS: u16 = 1;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Decoding and transport settings
    pub playback: PlaybackConfig,

    /// Audio output device selection
    pub output: OutputConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Playback configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Expected payload sample rate in Hz
    pub sample_rate: u32,

    /// Expected payload channel count
    pub channels: u16,

    /// Volume applied before the first `set_volume` (0.0-1.0)
    pub initial_volume: f32,

    /// Position observer cadence in milliseconds (one display refresh)
    pub position_tick_ms: u64,

    /// Interval between `PlaybackProgress` events in milliseconds
    pub progress_event_interval_ms: u64,

    /// Distance covered by a single skip forward/backward, in seconds
    pub skip_seconds: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            initial_volume: 1.0,
            position_tick_ms: 16,
            progress_event_interval_ms: 1000,
            skip_seconds: 15.0,
        }
    }
}

/// Output device configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output device name (None = default device)
    pub device: Option<String>,

    /// Requested buffer size in frames (None = device default)
    pub buffer_size: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Path passed on the command line
    CommandLine(PathBuf),
    /// Path named by `SERENE_CONFIG`
    Environment(PathBuf),
    /// Platform config directory
    PlatformDefault(PathBuf),
    /// No file found, compiled defaults in use
    CompiledDefaults,
}

impl ConfigSource {
    /// Path of the config file, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::PlatformDefault(p) => Some(p),
            ConfigSource::CompiledDefaults => None,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()
    }

    /// Load configuration from a specific file
    ///
    /// # Errors
    /// - `Error::Io` if the file cannot be read
    /// - `Error::Config` if the file is not valid TOML or fails validation
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Resolve and load configuration, degrading to defaults when no file is usable.
    ///
    /// A missing or unreadable file logs a warning and yields compiled defaults.
    /// A malformed file is still an error.
    pub fn load_or_default(cli_arg: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let Some(source) = resolve_config_path(cli_arg) else {
            debug!("No configuration file found, using compiled defaults");
            return Ok((Self::default(), ConfigSource::CompiledDefaults));
        };

        let Some(path) = source.path().map(Path::to_path_buf) else {
            return Ok((Self::default(), ConfigSource::CompiledDefaults));
        };

        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                Ok((config, source))
            }
            Err(Error::Io(e)) => {
                warn!(
                    "Could not read config file {} ({}), using compiled defaults",
                    path.display(),
                    e
                );
                Ok((Self::default(), ConfigSource::CompiledDefaults))
            }
            Err(e) => Err(e),
        }
    }

    /// Validate settings, clamping recoverable values.
    pub fn validate(mut self) -> Result<Self> {
        if self.playback.sample_rate == 0 {
            return Err(Error::Config("playback.sample_rate must be greater than 0".to_string()));
        }
        if self.playback.channels == 0 {
            return Err(Error::Config("playback.channels must be greater than 0".to_string()));
        }
        if self.playback.position_tick_ms == 0 {
            return Err(Error::Config(
                "playback.position_tick_ms must be greater than 0".to_string(),
            ));
        }
        if !self.playback.skip_seconds.is_finite() || self.playback.skip_seconds <= 0.0 {
            return Err(Error::Config(
                "playback.skip_seconds must be a positive number".to_string(),
            ));
        }

        let volume = self.playback.initial_volume;
        if !volume.is_finite() || !(0.0..=1.0).contains(&volume) {
            let clamped = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 1.0 };
            warn!(
                "playback.initial_volume {} out of range, using {}",
                volume, clamped
            );
            self.playback.initial_volume = clamped;
        }

        Ok(self)
    }
}

/// Find the config file to use, following the documented priority order.
///
/// Returns None when neither an explicit path nor a platform config file exists.
/// Explicit paths (CLI or environment) are returned even if the file is missing,
/// so the caller can warn about them.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<ConfigSource> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(ConfigSource::CommandLine(path.to_path_buf()));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(ConfigSource::Environment(PathBuf::from(path)));
        }
    }

    // Priority 3: Platform config directory
    platform_config_path()
        .filter(|p| p.exists())
        .map(ConfigSource::PlatformDefault)
}

/// Platform-specific location of the user config file
pub fn platform_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("serene").join("config.toml"))
}
