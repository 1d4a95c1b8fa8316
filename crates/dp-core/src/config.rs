//! Persistent configuration

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audio pipeline settings
    pub audio: AudioConfig,
    /// Logging and diagnostics settings
    pub debug: DebugConfig,
}

impl Config {
    /// Location of the config file (`<config dir>/dmapump/config.toml`)
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("dmapump").join("config.toml"))
    }

    /// Load the configuration from disk, falling back to defaults when no
    /// config file exists yet.
    pub fn load() -> Result<Self, ConfigError> {
        let Some(path) = Self::path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        Self::from_toml(&text)
    }

    /// Save the configuration to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        let Some(path) = Self::path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.to_toml()?)?;
        tracing::debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Serialize the configuration to TOML text
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Audio hardware family the pump drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardwareProfile {
    /// Original 4-channel 8-bit chipset audio
    Paula,
    /// 16-channel 16-bit audio
    Arne,
    /// 4-channel 16-bit audio
    Pamela,
    /// 8-channel 8-bit audio in two register banks
    Saga,
    /// Host audio output through cpal
    Portable,
}

/// How the mixing engine's output reaches the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputTopology {
    /// Engine mixes to interleaved stereo, folded onto two hardware lanes
    MixDown,
    /// Engine renders one buffer per hardware channel
    DirectOut,
    /// Hardware resamples voices itself; engine sends per-voice events
    HardwareOut,
}

/// Audio settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Enable audio output
    pub enable: bool,
    /// Hardware family
    pub profile: HardwareProfile,
    /// Output topology
    pub topology: OutputTopology,
    /// Requested block size in samples (rounded up to a power of two)
    pub block_size: usize,
    /// Requested sample rate in Hz (the profile may override it)
    pub sample_rate: u32,
    /// Right-shift applied when narrowing the mix accumulator
    pub precision_shift: u32,
    /// Buffering ticks per statistics epoch (50 for PAL, 60 for NTSC)
    pub refresh_rate: u32,
    /// Channel count for the portable profile
    pub portable_channels: usize,
    /// Consecutive gated buffering ticks that count as one underrun
    pub underrun_threshold: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enable: true,
            profile: HardwareProfile::Portable,
            topology: OutputTopology::MixDown,
            block_size: 2048,
            sample_rate: 44100,
            precision_shift: 0,
            refresh_rate: 50,
            portable_channels: 4,
            underrun_threshold: 50,
        }
    }
}

/// Log verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Logging and diagnostics settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Log verbosity
    pub log_level: LogLevel,
    /// Also write log output to `log_path`
    pub log_to_file: bool,
    /// Log file location
    pub log_path: PathBuf,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_to_file: false,
            log_path: PathBuf::from("dmapump.log"),
        }
    }
}
