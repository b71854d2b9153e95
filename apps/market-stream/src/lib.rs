#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream - Live Market Data Client
//!
//! Keeps one WebSocket connection to the live quote feed, tracks which
//! symbols the user wants across reconnects, and maintains a last-value
//! snapshot per watched symbol.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: pure types and state
//!   - `symbol`: ticker normalization
//!   - `connection`: connection state machine
//!   - `subscription`: desired-symbol registry
//!   - `snapshot`: last-value cache
//!
//! - **Application**: ports and services
//!   - `ports`: feed transport and codec interfaces
//!   - `services`: tick router, stream core, facade
//!
//! - **Infrastructure**: adapters
//!   - `feed`: WebSocket transport, JSON codec, connection manager
//!   - `config`: environment configuration
//!   - `health`: health check HTTP endpoint
//!   - `metrics`, `telemetry`: observability
//!
//! # Data Flow
//!
//! ```text
//! add/remove ──► StreamFacade ──► SubscriptionRegistry ──► ConnectionManager ──► feed
//!                     ▲                                          │
//!                     │                                          ▼
//!              observers ◄── SnapshotStore ◄── TickRouter ◄── frames
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::ConnectionState;
pub use domain::snapshot::{Direction, MarketSnapshot, QuoteFields, SnapshotLookup};
pub use domain::subscription::SubscriptionState;
pub use domain::symbol::{Symbol, SymbolError};

// Ports (for custom transports and codecs)
pub use application::ports::{
    DecodeError, FeedCodec, FeedSession, FeedTransport, InboundFrame, TransportError,
};

// Services
pub use application::services::{DiagnosticsSnapshot, ObserverId, StreamEvent, StreamFacade};

// Feed adapter
pub use infrastructure::feed::{
    AuthToken, ConnectionConfig, JsonCodec, ReconnectConfig, StartError, WebSocketTransport,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServerSettings, StreamConfig, StreamSettings};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
