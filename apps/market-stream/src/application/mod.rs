//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with the feed.

/// Port interfaces for the feed transport and wire codec.
pub mod ports;

/// Frame routing, the serialised stream core and the public facade.
pub mod services;
