//! Subscription Registry
//!
//! Tracks the *desired* set of symbols, independent of whether the feed is
//! currently connected, and turns add/remove intents into outbound feed
//! commands.
//!
//! # Design
//!
//! Each desired symbol is either `Pending` (no subscribe sent on the current
//! connection) or `Active` (subscribe sent on the current connection). The
//! registry never sends while the sink reports it is disconnected; pending
//! symbols are flushed by [`SubscriptionRegistry::on_connected`], which the
//! connection manager triggers on every Connected transition.

use std::collections::BTreeMap;

use serde::Serialize;

use super::symbol::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Per-symbol subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    /// Desired, but no subscribe sent on the current connection.
    Pending,
    /// Subscribe sent on the current connection.
    Active,
}

/// Outbound command for the feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedCommand {
    /// Start streaming a symbol.
    Subscribe(Symbol),
    /// Stop streaming a symbol.
    Unsubscribe(Symbol),
}

impl FeedCommand {
    /// The symbol the command refers to.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Subscribe(symbol) | Self::Unsubscribe(symbol) => symbol,
        }
    }

    /// Short name for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
        }
    }
}

/// Failure to hand a command to the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// No connection is open.
    #[error("feed is not connected")]
    NotConnected,
    /// The connection task has gone away.
    #[error("feed connection closed")]
    Closed,
}

/// Where the registry sends feed commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandSink {
    /// Whether a connection is open and commands may be sent.
    fn is_connected(&self) -> bool;

    /// Send one command on the current connection.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the command could not be queued.
    fn send(&mut self, command: FeedCommand) -> Result<(), SinkError>;
}

/// Outcome of [`SubscriptionRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Symbol was not desired; nothing changed.
    NotWatched,
    /// Entry removed; no unsubscribe was needed.
    Removed,
    /// Entry removed and an unsubscribe was sent.
    RemovedAndUnsubscribed,
}

impl Removal {
    /// Whether an entry was removed.
    #[must_use]
    pub const fn removed(self) -> bool {
        !matches!(self, Self::NotWatched)
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// The desired symbol set with per-symbol send state.
///
/// # Example
///
/// ```rust
/// use market_stream::domain::subscription::{
///     CommandSink, FeedCommand, SinkError, SubscriptionRegistry, SubscriptionState,
/// };
/// use market_stream::domain::symbol::Symbol;
///
/// struct Offline;
/// impl CommandSink for Offline {
///     fn is_connected(&self) -> bool { false }
///     fn send(&mut self, _: FeedCommand) -> Result<(), SinkError> { Err(SinkError::NotConnected) }
/// }
///
/// let mut registry = SubscriptionRegistry::new();
/// let aapl = Symbol::parse("aapl").unwrap();
///
/// // Added while offline: desired but pending
/// assert!(registry.add(aapl.clone(), &mut Offline));
/// assert_eq!(registry.state(aapl.as_str()), Some(SubscriptionState::Pending));
///
/// // Adding again is a no-op
/// assert!(!registry.add(aapl, &mut Offline));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<Symbol, SubscriptionState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a symbol as desired.
    ///
    /// Returns `false` if it was already desired (no command is sent).
    /// Otherwise inserts it as pending and, if the sink is connected,
    /// subscribes immediately.
    pub fn add(&mut self, symbol: Symbol, sink: &mut impl CommandSink) -> bool {
        if self.entries.contains_key(&symbol) {
            return false;
        }

        let state = if sink.is_connected() {
            Self::subscribe(&symbol, sink)
        } else {
            SubscriptionState::Pending
        };
        self.entries.insert(symbol, state);
        true
    }

    /// Forget a desired symbol.
    ///
    /// Sends a best-effort unsubscribe if the symbol was active; a send
    /// failure does not keep the entry alive.
    pub fn remove(&mut self, symbol: &str, sink: &mut impl CommandSink) -> Removal {
        let Some((symbol, state)) = self.entries.remove_entry(symbol) else {
            return Removal::NotWatched;
        };

        if state != SubscriptionState::Active || !sink.is_connected() {
            return Removal::Removed;
        }

        match sink.send(FeedCommand::Unsubscribe(symbol.clone())) {
            Ok(()) => Removal::RemovedAndUnsubscribed,
            Err(e) => {
                tracing::debug!(%symbol, error = %e, "Unsubscribe not sent");
                Removal::Removed
            }
        }
    }

    /// Replay every desired symbol on a fresh connection.
    ///
    /// Every entry is re-sent regardless of prior state, since the feed keeps
    /// no memory of earlier connections. Returns the number of subscribes
    /// sent.
    pub fn on_connected(&mut self, sink: &mut impl CommandSink) -> usize {
        let mut sent = 0;
        for (symbol, state) in &mut self.entries {
            *state = Self::subscribe(symbol, sink);
            if *state == SubscriptionState::Active {
                sent += 1;
            }
        }
        sent
    }

    /// Mark every entry pending after the connection is lost.
    pub fn on_disconnected(&mut self) {
        for state in self.entries.values_mut() {
            *state = SubscriptionState::Pending;
        }
    }

    /// Whether a symbol is desired.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.entries.contains_key(symbol)
    }

    /// State of a desired symbol.
    #[must_use]
    pub fn state(&self, symbol: &str) -> Option<SubscriptionState> {
        self.entries.get(symbol).copied()
    }

    /// Desired symbols in sorted order.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.entries.keys()
    }

    /// Desired symbols with their state.
    pub fn entries(&self) -> impl Iterator<Item = (&Symbol, SubscriptionState)> {
        self.entries.iter().map(|(symbol, state)| (symbol, *state))
    }

    /// Number of desired symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn subscribe(symbol: &Symbol, sink: &mut impl CommandSink) -> SubscriptionState {
        match sink.send(FeedCommand::Subscribe(symbol.clone())) {
            Ok(()) => SubscriptionState::Active,
            Err(e) => {
                tracing::debug!(%symbol, error = %e, "Subscribe deferred");
                SubscriptionState::Pending
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use proptest::prelude::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    /// Sink that records everything it is asked to send.
    #[derive(Default)]
    struct RecordingSink {
        connected: bool,
        sent: Vec<FeedCommand>,
    }

    impl RecordingSink {
        fn online() -> Self {
            Self {
                connected: true,
                sent: Vec::new(),
            }
        }

        fn subscribes(&self) -> Vec<&str> {
            self.sent
                .iter()
                .filter(|c| matches!(c, FeedCommand::Subscribe(_)))
                .map(|c| c.symbol().as_str())
                .collect()
        }
    }

    impl CommandSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send(&mut self, command: FeedCommand) -> Result<(), SinkError> {
            if !self.connected {
                return Err(SinkError::NotConnected);
            }
            self.sent.push(command);
            Ok(())
        }
    }

    #[test]
    fn add_while_connected_subscribes_immediately() {
        let mut registry = SubscriptionRegistry::new();
        let mut sink = RecordingSink::online();

        assert!(registry.add(sym("AAPL"), &mut sink));

        assert_eq!(sink.sent, vec![FeedCommand::Subscribe(sym("AAPL"))]);
        assert_eq!(registry.state("AAPL"), Some(SubscriptionState::Active));
    }

    #[test]
    fn add_while_disconnected_stays_pending() {
        let mut registry = SubscriptionRegistry::new();
        let mut sink = RecordingSink::default();

        assert!(registry.add(sym("AAPL"), &mut sink));

        assert!(sink.sent.is_empty());
        assert_eq!(registry.state("AAPL"), Some(SubscriptionState::Pending));
    }

    #[test]
    fn duplicate_add_sends_nothing() {
        let mut registry = SubscriptionRegistry::new();
        let mut sink = RecordingSink::online();

        registry.add(sym("AAPL"), &mut sink);
        assert!(!registry.add(sym("aapl"), &mut sink));

        assert_eq!(sink.subscribes(), vec!["AAPL"]);
    }

    #[test]
    fn remove_active_sends_unsubscribe() {
        let mut registry = SubscriptionRegistry::new();
        let mut sink = RecordingSink::online();
        registry.add(sym("AAPL"), &mut sink);

        assert_eq!(
            registry.remove("AAPL", &mut sink),
            Removal::RemovedAndUnsubscribed
        );
        assert_eq!(sink.sent[1], FeedCommand::Unsubscribe(sym("AAPL")));
        assert!(!registry.contains("AAPL"));
    }

    #[test]
    fn remove_pending_sends_nothing() {
        let mut registry = SubscriptionRegistry::new();
        let mut sink = RecordingSink::default();
        registry.add(sym("AAPL"), &mut sink);

        sink.connected = true;
        assert_eq!(registry.remove("AAPL", &mut sink), Removal::Removed);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        let mut sink = RecordingSink::online();
        assert_eq!(registry.remove("AAPL", &mut sink), Removal::NotWatched);
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn remove_survives_send_failure() {
        let mut registry = SubscriptionRegistry::new();
        let mut online = RecordingSink::online();
        registry.add(sym("AAPL"), &mut online);

        let mut sink = MockCommandSink::new();
        sink.expect_is_connected().return_const(true);
        sink.expect_send()
            .with(eq(FeedCommand::Unsubscribe(sym("AAPL"))))
            .times(1)
            .returning(|_| Err(SinkError::Closed));

        assert_eq!(registry.remove("AAPL", &mut sink), Removal::Removed);
        assert!(registry.is_empty());
    }

    #[test]
    fn on_connected_replays_every_symbol_once() {
        let mut registry = SubscriptionRegistry::new();
        let mut sink = RecordingSink::online();
        registry.add(sym("AAPL"), &mut sink);
        registry.add(sym("MSFT"), &mut sink);

        registry.on_disconnected();
        assert_eq!(registry.state("AAPL"), Some(SubscriptionState::Pending));

        let mut fresh = RecordingSink::online();
        assert_eq!(registry.on_connected(&mut fresh), 2);
        assert_eq!(fresh.subscribes(), vec!["AAPL", "MSFT"]);
        assert!(
            registry
                .entries()
                .all(|(_, state)| state == SubscriptionState::Active)
        );
    }

    #[test]
    fn on_connected_resends_even_if_already_active() {
        let mut registry = SubscriptionRegistry::new();
        let mut sink = RecordingSink::online();
        registry.add(sym("AAPL"), &mut sink);

        let mut fresh = RecordingSink::online();
        assert_eq!(registry.on_connected(&mut fresh), 1);
        assert_eq!(fresh.subscribes(), vec!["AAPL"]);
    }

    #[test]
    fn on_connected_failure_leaves_pending() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(sym("AAPL"), &mut RecordingSink::default());

        let mut sink = MockCommandSink::new();
        sink.expect_send().returning(|_| Err(SinkError::Closed));

        assert_eq!(registry.on_connected(&mut sink), 0);
        assert_eq!(registry.state("AAPL"), Some(SubscriptionState::Pending));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(String),
        Remove(String),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let symbol = prop::sample::select(vec!["aapl", "AAPL", "msft", "MSFT", "goog", "tsla"]);
        prop_oneof![
            symbol.clone().prop_map(|s| Op::Add(s.to_string())),
            symbol.prop_map(|s| Op::Remove(s.to_string())),
        ]
    }

    proptest! {
        #[test]
        fn desired_set_matches_last_intent(
            ops in prop::collection::vec(op_strategy(), 0..64),
            connected in any::<bool>(),
        ) {
            let mut registry = SubscriptionRegistry::new();
            let mut sink = RecordingSink { connected, sent: Vec::new() };
            let mut expected = std::collections::BTreeSet::new();

            for op in &ops {
                match op {
                    Op::Add(raw) => {
                        let symbol = sym(raw);
                        registry.add(symbol.clone(), &mut sink);
                        expected.insert(symbol);
                    }
                    Op::Remove(raw) => {
                        let symbol = sym(raw);
                        registry.remove(symbol.as_str(), &mut sink);
                        expected.remove(&symbol);
                    }
                }
            }

            let actual: std::collections::BTreeSet<_> = registry.symbols().cloned().collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn replay_sends_exactly_desired_set(
            ops in prop::collection::vec(op_strategy(), 0..64),
        ) {
            let mut registry = SubscriptionRegistry::new();
            let mut offline = RecordingSink::default();
            for op in &ops {
                match op {
                    Op::Add(raw) => { registry.add(sym(raw), &mut offline); }
                    Op::Remove(raw) => { registry.remove(sym(raw).as_str(), &mut offline); }
                }
            }

            let mut sink = RecordingSink::online();
            let sent = registry.on_connected(&mut sink);

            prop_assert_eq!(sent, registry.len());
            let mut subscribed = sink.subscribes();
            subscribed.dedup();
            prop_assert_eq!(subscribed.len(), registry.len());
        }
    }
}
