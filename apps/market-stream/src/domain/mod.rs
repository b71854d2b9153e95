//! Domain Layer - Core streaming types and state.
//!
//! Pure types for the live quote subsystem. Nothing here performs I/O; the
//! registry talks to the outside world only through [`subscription::CommandSink`].

/// Connection lifecycle state machine.
pub mod connection;

/// Last-value snapshot cache.
pub mod snapshot;

/// Desired-symbol registry and outbound commands.
pub mod subscription;

/// Ticker symbol normalization.
pub mod symbol;
