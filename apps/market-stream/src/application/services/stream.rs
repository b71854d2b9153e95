//! Stream Core
//!
//! The single owner of subscription, snapshot and connection state. Every
//! event (a user command, an inbound frame, a connection transition) runs as
//! one *turn*:
//!
//! 1. take the turn lock (re-entrant, so observer callbacks may call back in)
//! 2. mutate state under the state lock and collect the resulting events
//! 3. release the state lock and notify observers
//!
//! Turns never interleave, so the order observers see matches the order
//! state changed.
//!
//! Outbound commands go to the connection task through a per-session
//! channel (the *link*). The link only exists while a connection is open;
//! when the session ends its channel goes with it, and the reconnect replay
//! re-sends whatever is still desired.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;

use crate::application::ports::FeedCodec;
use crate::domain::connection::ConnectionState;
use crate::domain::snapshot::{SnapshotLookup, SnapshotStore};
use crate::domain::subscription::{
    CommandSink, FeedCommand, Removal, SinkError, SubscriptionRegistry, SubscriptionState,
};
use crate::domain::symbol::Symbol;
use crate::infrastructure::metrics;

use super::events::{ObserverList, StreamEvent};
use super::router::{DiagnosticsSnapshot, RouteOutcome, TickRouter};

/// Sender half of a connection session's outbound queue.
pub type Link = mpsc::UnboundedSender<FeedCommand>;

#[derive(Debug, Default)]
struct CoreState {
    registry: SubscriptionRegistry,
    store: SnapshotStore,
    connection: ConnectionState,
    link: Option<Link>,
}

impl CoreState {
    fn set_connection(&mut self, to: ConnectionState, events: &mut Vec<StreamEvent>) -> bool {
        let from = self.connection;
        if from == to {
            return false;
        }
        if !from.can_transition_to(to) {
            tracing::warn!(%from, %to, "Ignoring illegal connection transition");
            return false;
        }

        self.connection = to;
        metrics::set_connection_state(to);
        tracing::info!(%from, %to, "Connection state changed");
        events.push(StreamEvent::ConnectionStateChanged { from, to });
        true
    }
}

/// Writes commands into the current session's link.
struct LinkSink<'a> {
    connected: bool,
    link: Option<&'a Link>,
}

impl<'a> LinkSink<'a> {
    fn new(state: &'a CoreState) -> Self {
        Self {
            connected: state.connection.is_connected(),
            link: state.link.as_ref(),
        }
    }
}

impl CommandSink for LinkSink<'_> {
    fn is_connected(&self) -> bool {
        self.connected && self.link.is_some()
    }

    fn send(&mut self, command: FeedCommand) -> Result<(), SinkError> {
        if !self.connected {
            return Err(SinkError::NotConnected);
        }
        let link = self.link.ok_or(SinkError::NotConnected)?;
        link.send(command).map_err(|_| SinkError::Closed)
    }
}

// =============================================================================
// Stream Core
// =============================================================================

/// Serialised state holder shared by the facade and the connection task.
pub struct StreamCore {
    turn: ReentrantMutex<()>,
    state: Mutex<CoreState>,
    router: TickRouter,
    observers: ObserverList,
}

impl std::fmt::Debug for StreamCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCore")
            .field("state", &*self.state.lock())
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl StreamCore {
    /// Create an empty core decoding frames with `codec`.
    #[must_use]
    pub fn new(codec: Arc<dyn FeedCodec>) -> Self {
        Self {
            turn: ReentrantMutex::new(()),
            state: Mutex::new(CoreState::default()),
            router: TickRouter::new(codec),
            observers: ObserverList::new(),
        }
    }

    /// Run one turn: mutate state, then notify observers.
    fn turn<R>(&self, f: impl FnOnce(&mut CoreState, &mut Vec<StreamEvent>) -> R) -> R {
        let _turn = self.turn.lock();
        let mut events = Vec::new();
        let result = {
            let mut state = self.state.lock();
            f(&mut state, &mut events)
        };
        self.observers.dispatch(&events);
        result
    }

    // -------------------------------------------------------------------------
    // User commands
    // -------------------------------------------------------------------------

    /// Add a symbol to the desired set. Returns `false` if already watched.
    pub fn watch(&self, symbol: Symbol) -> bool {
        self.turn(|state, _| {
            let CoreState {
                registry,
                store,
                link,
                connection,
            } = state;
            let mut sink = LinkSink {
                connected: connection.is_connected(),
                link: link.as_ref(),
            };

            if !registry.add(symbol.clone(), &mut sink) {
                return false;
            }
            tracing::info!(%symbol, state = ?registry.state(symbol.as_str()), "Watching symbol");
            store.track(symbol);
            metrics::set_watched_symbols(registry.len());
            true
        })
    }

    /// Remove a symbol from the desired set and evict its snapshot.
    ///
    /// Returns `false` if it was not watched.
    pub fn unwatch(&self, symbol: &Symbol) -> bool {
        self.turn(|state, events| {
            let CoreState {
                registry,
                store,
                link,
                connection,
            } = state;
            let mut sink = LinkSink {
                connected: connection.is_connected(),
                link: link.as_ref(),
            };

            let removal = registry.remove(symbol.as_str(), &mut sink);
            if removal == Removal::NotWatched {
                return false;
            }

            store.evict(symbol.as_str());
            metrics::set_watched_symbols(registry.len());
            tracing::info!(
                %symbol,
                unsubscribed = removal == Removal::RemovedAndUnsubscribed,
                "Unwatched symbol"
            );

            events.push(StreamEvent::SnapshotEvicted(symbol.clone()));
            true
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Current snapshot for a normalized symbol.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> SnapshotLookup {
        self.state.lock().store.get(symbol)
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Desired symbols with their subscription state.
    #[must_use]
    pub fn watched(&self) -> Vec<(Symbol, SubscriptionState)> {
        self.state
            .lock()
            .registry
            .entries()
            .map(|(symbol, state)| (symbol.clone(), state))
            .collect()
    }

    /// Frame counters.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.router.diagnostics().snapshot()
    }

    /// Observer registry.
    #[must_use]
    pub const fn observers(&self) -> &ObserverList {
        &self.observers
    }

    // -------------------------------------------------------------------------
    // Connection events
    // -------------------------------------------------------------------------

    /// Route one inbound frame.
    pub fn handle_frame(&self, raw: &str) -> RouteOutcome {
        self.turn(|state, events| {
            let outcome = self
                .router
                .route(raw, &state.registry, &mut state.store, Utc::now());
            if let RouteOutcome::Accepted(snapshot) = &outcome {
                events.push(StreamEvent::SnapshotUpdated(snapshot.clone()));
            }
            outcome
        })
    }

    /// Move to `to` if the transition is legal. Returns whether it happened.
    pub fn transition(&self, to: ConnectionState) -> bool {
        self.turn(|state, events| state.set_connection(to, events))
    }

    /// A connection opened: install its link, go Connected and replay every
    /// desired symbol on it. Returns the number of subscribes queued, or
    /// `None` if the transition was not legal (the link is not installed).
    pub fn attach(&self, link: Link) -> Option<usize> {
        self.turn(|state, events| {
            if !state.set_connection(ConnectionState::Connected, events) {
                return None;
            }
            state.link = Some(link);

            let CoreState { registry, link, .. } = state;
            let mut sink = LinkSink {
                connected: true,
                link: link.as_ref(),
            };
            let sent = registry.on_connected(&mut sink);
            tracing::info!(subscribes = sent, watched = registry.len(), "Replayed subscriptions");
            Some(sent)
        })
    }

    /// The current connection is gone: drop its link, mark every desired
    /// symbol pending and move to `to`.
    pub fn detach(&self, to: ConnectionState) {
        self.turn(|state, events| {
            state.link = None;
            state.registry.on_disconnected();
            state.set_connection(to, events);
        });
    }

    /// Whether outbound commands would currently be delivered.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        LinkSink::new(&self.state.lock()).is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::feed::JsonCodec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn core() -> StreamCore {
        StreamCore::new(Arc::new(JsonCodec::new()))
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<FeedCommand>) -> Vec<FeedCommand> {
        let mut out = Vec::new();
        while let Ok(command) = rx.try_recv() {
            out.push(command);
        }
        out
    }

    fn connect(core: &StreamCore) -> mpsc::UnboundedReceiver<FeedCommand> {
        let (tx, rx) = mpsc::unbounded_channel();
        core.transition(ConnectionState::Connecting);
        core.attach(tx).unwrap();
        rx
    }

    const AAPL_FRAME: &str = r#"{"type":"market_data","symbol":"AAPL","current":150.2,"high":151,"low":149,"change":1.2,"percent_change":0.8}"#;

    #[test]
    fn watch_while_disconnected_queues_until_attach() {
        let core = core();
        assert!(core.watch(sym("AAPL")));
        assert_eq!(core.snapshot("AAPL"), SnapshotLookup::Pending);

        let mut rx = connect(&core);

        assert_eq!(drain(&mut rx), vec![FeedCommand::Subscribe(sym("AAPL"))]);
        assert_eq!(
            core.watched(),
            vec![(sym("AAPL"), SubscriptionState::Active)]
        );
    }

    #[test]
    fn watch_while_connected_sends_once() {
        let core = core();
        let mut rx = connect(&core);

        assert!(core.watch(sym("AAPL")));
        assert!(!core.watch(sym("AAPL")));

        assert_eq!(drain(&mut rx), vec![FeedCommand::Subscribe(sym("AAPL"))]);
    }

    #[test]
    fn unwatch_evicts_and_drops_stale_frames() {
        let core = core();
        let mut rx = connect(&core);
        core.watch(sym("AAPL"));
        assert!(core.handle_frame(AAPL_FRAME).accepted().is_some());

        assert!(core.unwatch(&sym("AAPL")));
        assert_eq!(core.snapshot("AAPL"), SnapshotLookup::NotWatched);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&FeedCommand::Unsubscribe(sym("AAPL")))
        );

        assert!(matches!(
            core.handle_frame(AAPL_FRAME),
            RouteOutcome::UndesiredSymbol(_)
        ));
        assert_eq!(core.snapshot("AAPL"), SnapshotLookup::NotWatched);
    }

    #[test]
    fn unwatch_without_data_still_evicts() {
        let core = core();
        core.watch(sym("AAPL"));
        assert!(core.unwatch(&sym("AAPL")));
        assert!(!core.unwatch(&sym("AAPL")));
        assert_eq!(core.snapshot("AAPL"), SnapshotLookup::NotWatched);
    }

    #[test]
    fn detach_then_attach_replays_without_duplicates() {
        let core = core();
        core.watch(sym("AAPL"));
        core.watch(sym("MSFT"));
        let mut first = connect(&core);
        assert_eq!(drain(&mut first).len(), 2);

        core.detach(ConnectionState::Reconnecting);
        assert!(!core.is_linked());
        assert!(
            core.watched()
                .iter()
                .all(|(_, state)| *state == SubscriptionState::Pending)
        );

        let (tx, mut second) = mpsc::unbounded_channel();
        assert_eq!(core.attach(tx), Some(2));
        assert_eq!(
            drain(&mut second),
            vec![
                FeedCommand::Subscribe(sym("AAPL")),
                FeedCommand::Subscribe(sym("MSFT")),
            ]
        );
    }

    #[test]
    fn commands_after_detach_are_not_sent() {
        let core = core();
        let mut rx = connect(&core);
        core.detach(ConnectionState::Reconnecting);

        core.watch(sym("AAPL"));

        assert!(drain(&mut rx).is_empty());
        assert_eq!(core.watched()[0].1, SubscriptionState::Pending);
    }

    #[test]
    fn illegal_attach_is_refused() {
        let core = core();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(core.attach(tx), None);
        assert!(!core.is_linked());
        assert_eq!(core.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn observers_see_transitions_updates_and_evictions() {
        let core = core();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        core.observers().subscribe(Arc::new(move |event: &StreamEvent| {
            sink.lock().push(event.clone());
        }));

        core.watch(sym("AAPL"));
        let _rx = connect(&core);
        core.handle_frame(AAPL_FRAME);
        core.unwatch(&sym("AAPL"));

        let seen = seen.lock();
        assert_eq!(seen.len(), 4);
        assert!(matches!(
            seen[1],
            StreamEvent::ConnectionStateChanged {
                to: ConnectionState::Connected,
                ..
            }
        ));
        assert!(matches!(seen[2], StreamEvent::SnapshotUpdated(_)));
        assert_eq!(seen[3], StreamEvent::SnapshotEvicted(sym("AAPL")));
    }

    #[test]
    fn observer_may_call_back_into_core() {
        let core = Arc::new(core());
        let reads = Arc::new(AtomicUsize::new(0));
        let (inner, counter) = (Arc::downgrade(&core), Arc::clone(&reads));
        core.observers().subscribe(Arc::new(move |event: &StreamEvent| {
            if let (StreamEvent::SnapshotUpdated(s), Some(core)) = (event, inner.upgrade()) {
                assert!(core.snapshot(s.symbol.as_str()).snapshot().is_some());
                core.unwatch(&s.symbol);
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        core.watch(sym("AAPL"));
        let _rx = connect(&core);
        core.handle_frame(AAPL_FRAME);

        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(core.snapshot("AAPL"), SnapshotLookup::NotWatched);
    }
}
