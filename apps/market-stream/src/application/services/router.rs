//! Tick Router
//!
//! Decodes inbound frames and applies market data to the snapshot store.
//! Nothing here can fail the connection: every frame ends as exactly one
//! [`RouteOutcome`], and drops are counted in [`FrameDiagnostics`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::ports::{FeedCodec, InboundFrame};
use crate::domain::snapshot::{MarketSnapshot, SnapshotStore};
use crate::domain::subscription::SubscriptionRegistry;
use crate::domain::symbol::Symbol;
use crate::infrastructure::metrics::{self, DropReason};

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Market data stored as the symbol's new snapshot.
    Accepted(MarketSnapshot),
    /// Frame could not be decoded.
    Malformed,
    /// Market data for a symbol that is not watched.
    UndesiredSymbol(Symbol),
    /// Well-formed frame of a kind this client does not handle.
    Ignored {
        /// The frame's tag.
        kind: String,
    },
}

impl RouteOutcome {
    /// The stored snapshot, if the frame was accepted.
    #[must_use]
    pub const fn accepted(&self) -> Option<&MarketSnapshot> {
        match self {
            Self::Accepted(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Running counters of routed frames.
#[derive(Debug, Default)]
pub struct FrameDiagnostics {
    received: AtomicU64,
    accepted: AtomicU64,
    malformed: AtomicU64,
    undesired_symbol: AtomicU64,
    unknown_kind: AtomicU64,
}

/// Point-in-time copy of [`FrameDiagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Frames handed to the router.
    pub received: u64,
    /// Frames applied to a snapshot.
    pub accepted: u64,
    /// Frames that failed to decode.
    pub malformed: u64,
    /// Market data for unwatched symbols.
    pub undesired_symbol: u64,
    /// Frames of unhandled kinds.
    pub unknown_kind: u64,
}

impl DiagnosticsSnapshot {
    /// Frames that did not reach the store.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.malformed + self.undesired_symbol + self.unknown_kind
    }
}

impl FrameDiagnostics {
    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            undesired_symbol: self.undesired_symbol.load(Ordering::Relaxed),
            unknown_kind: self.unknown_kind.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &RouteOutcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_received();

        let (counter, reason) = match outcome {
            RouteOutcome::Accepted(_) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                metrics::record_frame_accepted();
                return;
            }
            RouteOutcome::Malformed => (&self.malformed, DropReason::Malformed),
            RouteOutcome::UndesiredSymbol(_) => {
                (&self.undesired_symbol, DropReason::UndesiredSymbol)
            }
            RouteOutcome::Ignored { .. } => (&self.unknown_kind, DropReason::UnknownKind),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_frame_dropped(reason);
    }
}

// =============================================================================
// Router
// =============================================================================

/// Decodes frames and forwards market data for watched symbols.
#[derive(Clone)]
pub struct TickRouter {
    codec: Arc<dyn FeedCodec>,
    diagnostics: Arc<FrameDiagnostics>,
}

impl std::fmt::Debug for TickRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickRouter")
            .field("diagnostics", &self.diagnostics.snapshot())
            .finish_non_exhaustive()
    }
}

impl TickRouter {
    /// Create a router over the given codec.
    #[must_use]
    pub fn new(codec: Arc<dyn FeedCodec>) -> Self {
        Self {
            codec,
            diagnostics: Arc::new(FrameDiagnostics::default()),
        }
    }

    /// Shared handle to the counters.
    #[must_use]
    pub fn diagnostics(&self) -> Arc<FrameDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    /// Route one raw frame.
    ///
    /// Membership is checked against the registry at handling time, so a
    /// frame for a symbol removed earlier is dropped even if it was in
    /// flight, and a frame arriving after a re-add is accepted.
    pub fn route(
        &self,
        raw: &str,
        registry: &SubscriptionRegistry,
        store: &mut SnapshotStore,
        received_at: DateTime<Utc>,
    ) -> RouteOutcome {
        let outcome = match self.codec.decode(raw) {
            Err(e) => {
                tracing::warn!(error = %e, kind = e.kind(), len = raw.len(), "Dropping malformed frame");
                RouteOutcome::Malformed
            }
            Ok(InboundFrame::Other { kind }) => {
                tracing::debug!(%kind, "Ignoring frame");
                RouteOutcome::Ignored { kind }
            }
            Ok(InboundFrame::MarketData { symbol, fields }) => {
                if registry.contains(symbol.as_str()) {
                    store
                        .update(&symbol, fields, received_at)
                        .cloned()
                        .map_or(RouteOutcome::UndesiredSymbol(symbol), RouteOutcome::Accepted)
                } else {
                    tracing::debug!(%symbol, "Dropping frame for unwatched symbol");
                    RouteOutcome::UndesiredSymbol(symbol)
                }
            }
        };

        self.diagnostics.record(&outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::SnapshotLookup;
    use crate::domain::subscription::{CommandSink, FeedCommand, SinkError};
    use crate::infrastructure::feed::JsonCodec;
    use rust_decimal::Decimal;

    struct Offline;

    impl CommandSink for Offline {
        fn is_connected(&self) -> bool {
            false
        }

        fn send(&mut self, _: FeedCommand) -> Result<(), SinkError> {
            Err(SinkError::NotConnected)
        }
    }

    fn setup(watched: &[&str]) -> (TickRouter, SubscriptionRegistry, SnapshotStore) {
        let mut registry = SubscriptionRegistry::new();
        let mut store = SnapshotStore::new();
        for raw in watched {
            let symbol = Symbol::parse(raw).unwrap();
            registry.add(symbol.clone(), &mut Offline);
            store.track(symbol);
        }
        (TickRouter::new(Arc::new(JsonCodec::new())), registry, store)
    }

    fn frame(symbol: &str, current: &str) -> String {
        format!(
            r#"{{"type":"market_data","symbol":"{symbol}","current":{current},"high":151,"low":149,"change":1.2,"percent_change":0.8}}"#
        )
    }

    #[test]
    fn accepts_watched_symbol() {
        let (router, registry, mut store) = setup(&["AAPL"]);

        let outcome = router.route(&frame("AAPL", "150.2"), &registry, &mut store, Utc::now());

        let snapshot = outcome.accepted().unwrap();
        assert_eq!(snapshot.current, Decimal::new(1502, 1));
        assert!(matches!(store.get("AAPL"), SnapshotLookup::Ready(_)));
    }

    #[test]
    fn lowercase_wire_symbol_is_normalized() {
        let (router, registry, mut store) = setup(&["AAPL"]);
        let outcome = router.route(&frame("aapl", "1"), &registry, &mut store, Utc::now());
        assert!(outcome.accepted().is_some());
    }

    #[test]
    fn drops_unwatched_symbol() {
        let (router, registry, mut store) = setup(&["AAPL"]);

        let outcome = router.route(&frame("MSFT", "1"), &registry, &mut store, Utc::now());

        assert_eq!(
            outcome,
            RouteOutcome::UndesiredSymbol(Symbol::parse("MSFT").unwrap())
        );
        assert_eq!(store.get("MSFT"), SnapshotLookup::NotWatched);
        assert_eq!(router.diagnostics().snapshot().undesired_symbol, 1);
    }

    #[test]
    fn last_write_wins() {
        let (router, registry, mut store) = setup(&["AAPL"]);
        router.route(&frame("AAPL", "1"), &registry, &mut store, Utc::now());
        router.route(&frame("AAPL", "2"), &registry, &mut store, Utc::now());

        let current = store.get("AAPL").into_snapshot().unwrap().current;
        assert_eq!(current, Decimal::from(2));
    }

    #[test]
    fn malformed_and_unknown_frames_are_counted() {
        let (router, registry, mut store) = setup(&["AAPL"]);

        assert_eq!(
            router.route("not json", &registry, &mut store, Utc::now()),
            RouteOutcome::Malformed
        );
        assert_eq!(
            router.route(r#"{"type":"heartbeat"}"#, &registry, &mut store, Utc::now()),
            RouteOutcome::Ignored {
                kind: "heartbeat".to_string()
            }
        );
        router.route(&frame("AAPL", "1"), &registry, &mut store, Utc::now());

        let stats = router.diagnostics().snapshot();
        assert_eq!(
            stats,
            DiagnosticsSnapshot {
                received: 3,
                accepted: 1,
                malformed: 1,
                undesired_symbol: 0,
                unknown_kind: 1,
            }
        );
        assert_eq!(stats.dropped(), 2);
    }
}
