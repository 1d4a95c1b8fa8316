//! Logging infrastructure for the audio pipeline

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, LogLevel};

/// Map a configured log level onto a tracing level (`None` disables logging)
pub fn level_for(log_level: LogLevel) -> Option<Level> {
    match log_level {
        LogLevel::Off => None,
        LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warn => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Trace => Some(Level::TRACE),
    }
}

/// Initialize the logging system based on configuration
pub fn init(config: &Config) {
    let Some(level) = level_for(config.debug.log_level) else {
        return;
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true),
    );

    if config.debug.log_to_file {
        if let Ok(file) = std::fs::File::create(&config.debug.log_path) {
            let file_layer = fmt::layer().with_writer(file).with_ansi(false);
            let _ = subscriber.with(file_layer).try_init();
        } else {
            let _ = subscriber.try_init();
        }
    } else {
        let _ = subscriber.try_init();
    }
}

/// Initialize logging with default settings (for tools and tests)
pub fn init_default() {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

// Component-specific logging macros

/// Log a buffering-tick trace message
#[macro_export]
macro_rules! pump_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "pump", $($arg)*)
    };
}

/// Log a pump lifecycle debug message
#[macro_export]
macro_rules! pump_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "pump", $($arg)*)
    };
}

/// Log a DMA-completion trace message
#[macro_export]
macro_rules! dma_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "dma", $($arg)*)
    };
}

/// Log a hardware voice trace message
#[macro_export]
macro_rules! voice_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "voice", $($arg)*)
    };
}

/// Log a hardware voice debug message
#[macro_export]
macro_rules! voice_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "voice", $($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_for(LogLevel::Off), None);
        assert_eq!(level_for(LogLevel::Warn), Some(Level::WARN));
        assert_eq!(level_for(LogLevel::Trace), Some(Level::TRACE));
    }

    #[test]
    fn test_init_is_repeatable() {
        init_default();
        init(&Config::default());
        pump_debug!("logging initialized twice");
    }
}
