//! Prometheus Metrics Module
//!
//! Exposes stream client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames received, accepted and dropped by reason
//! - **Commands**: outbound subscribe/unsubscribe messages written
//! - **Connection**: state gauge, reconnect attempts, transport errors
//! - **Subscriptions**: size of the desired symbol set
//!
//! Recording functions are safe to call before [`init_metrics`]; the
//! `metrics` facade discards values until a recorder is installed.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Idempotent: later calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_stream_frames_received_total",
        "Total text frames received from the feed"
    );
    describe_counter!(
        "market_stream_frames_accepted_total",
        "Market data frames applied to a snapshot"
    );
    describe_counter!(
        "market_stream_frames_dropped_total",
        "Frames dropped by reason"
    );
    describe_counter!(
        "market_stream_commands_sent_total",
        "Subscribe and unsubscribe messages written to the feed"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Reconnection attempts scheduled"
    );
    describe_counter!(
        "market_stream_transport_errors_total",
        "Transport errors by kind"
    );
    describe_gauge!(
        "market_stream_connection_state",
        "0=disconnected 1=connecting 2=connected 3=reconnecting 4=failed"
    );
    describe_gauge!(
        "market_stream_watched_symbols",
        "Number of symbols in the desired set"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why an inbound frame did not reach the snapshot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Could not be decoded.
    Malformed,
    /// Market data for a symbol that is not watched.
    UndesiredSymbol,
    /// Well-formed frame of an unhandled kind.
    UnknownKind,
}

impl DropReason {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::UndesiredSymbol => "undesired_symbol",
            Self::UnknownKind => "unknown_kind",
        }
    }
}

/// Record one inbound text frame.
pub fn record_frame_received() {
    counter!("market_stream_frames_received_total").increment(1);
}

/// Record a frame applied to a snapshot.
pub fn record_frame_accepted() {
    counter!("market_stream_frames_accepted_total").increment(1);
}

/// Record a dropped frame.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "market_stream_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record an outbound command written to the feed.
pub fn record_command_sent(kind: &'static str) {
    counter!(
        "market_stream_commands_sent_total",
        "command" => kind
    )
    .increment(1);
}

/// Record a scheduled reconnection attempt.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record a transport error.
pub fn record_transport_error(kind: &'static str) {
    counter!(
        "market_stream_transport_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("market_stream_connection_state").set(state.as_gauge());
}

/// Update the desired symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_watched_symbols(count: usize) {
    gauge!("market_stream_watched_symbols").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
