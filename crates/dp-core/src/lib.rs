//! Core infrastructure for dmapump
//!
//! Configuration, error taxonomy and logging shared by the audio crates
//! and tools.

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::{AudioError, Result};
