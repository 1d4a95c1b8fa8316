//! Error types for the audio pipeline

use std::io;

use thiserror::Error;

/// Top-level error returned by device lifecycle operations
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Invalid block size: {0} (must be 1..=65536 samples)")]
    InvalidBlockSize(usize),

    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),

    #[error("Invalid precision shift: {0} (must be 0..=15)")]
    InvalidPrecisionShift(u32),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("Allocation failed: {0}")]
    Allocation(String),

    #[error("Audio device is not open")]
    NotOpen,

    #[error("Audio device is already open")]
    AlreadyOpen,

    #[error("Mix proxy unlocked without a matching lock")]
    ProxyNotLocked,

    #[error("Mix proxy locked twice without unlock")]
    ProxyAlreadyLocked,

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by hardware sinks
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("No audio output device available")]
    NoDevice,

    #[error("Output stream error: {0}")]
    Stream(String),
}

/// Errors raised while loading or saving the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Result type for audio operations
pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AudioError::InvalidBlockSize(0);
        assert_eq!(
            err.to_string(),
            "Invalid block size: 0 (must be 1..=65536 samples)"
        );

        let err: AudioError = SinkError::Stream("device unplugged".into()).into();
        assert!(matches!(err, AudioError::Sink(SinkError::Stream(_))));
        assert_eq!(
            err.to_string(),
            "Sink error: Output stream error: device unplugged"
        );
    }
}
