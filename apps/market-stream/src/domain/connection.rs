//! Connection State
//!
//! The single feed connection moves through a small finite-state machine.
//! Only the connection manager drives transitions; everything else reads.
//!
//! - `Disconnected -> Connecting` on `start`
//! - `Connecting | Reconnecting -> Connected` when the transport opens
//! - `Connecting | Connected -> Reconnecting` on a transient failure
//! - `Connecting | Reconnecting -> Failed` on auth rejection or exhausted retries
//! - `Failed -> Connecting` on an explicit `start` retry
//! - any non-idle state `-> Disconnected` on `stop`

use serde::Serialize;

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// First connection attempt after `start` is in flight.
    Connecting,
    /// Connection open; outbound commands may be sent.
    Connected,
    /// Connection lost or attempt failed; retrying with backoff.
    Reconnecting,
    /// Terminal failure (auth rejected or retries exhausted).
    Failed,
}

impl ConnectionState {
    /// Whether outbound commands may be written.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the manager is actively trying to reach the feed.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Failed, Reconnecting};

        matches!(
            (self, next),
            (Disconnected | Failed, Connecting)
                | (Connecting | Reconnecting, Connected)
                | (Connecting | Connected, Reconnecting)
                | (Connecting | Reconnecting, Failed)
                | (Connecting | Connected | Reconnecting | Failed, Disconnected)
        )
    }

    /// Lower-case name for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    /// Numeric encoding for the connection state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Reconnecting => 3.0,
            Self::Failed => 4.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
