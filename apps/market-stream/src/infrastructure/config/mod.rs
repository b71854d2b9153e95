//! Configuration Module
//!
//! Environment-driven settings for the stream client binary.

mod settings;

pub use settings::{ConfigError, ServerSettings, StreamConfig, StreamSettings};
