//! Stream Facade
//!
//! The public surface for the UI layer. Validates raw symbol input, then
//! delegates to the [`StreamCore`] and the [`ConnectionManager`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use market_stream::application::services::StreamFacade;
//! use market_stream::infrastructure::feed::{ConnectionConfig, WebSocketTransport};
//! use url::Url;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ConnectionConfig::new(Url::parse("wss://feed.example/ws/getlivedata")?);
//! let facade = StreamFacade::new(WebSocketTransport::new(), config);
//!
//! facade.subscribe_to_changes(|event| println!("{event:?}"));
//! facade.add_symbol("aapl")?;
//! facade.start("my-token").await?;
//!
//! if let Some(snapshot) = facade.get_snapshot("AAPL").snapshot() {
//!     println!("AAPL {}", snapshot.current);
//! }
//!
//! facade.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::application::ports::{FeedCodec, FeedTransport};
use crate::domain::connection::ConnectionState;
use crate::domain::snapshot::SnapshotLookup;
use crate::domain::subscription::SubscriptionState;
use crate::domain::symbol::{Symbol, SymbolError};
use crate::infrastructure::feed::{
    AuthToken, ConnectionConfig, ConnectionManager, JsonCodec, StartError,
};

use super::events::{ObserverId, StreamEvent};
use super::router::DiagnosticsSnapshot;
use super::stream::StreamCore;

/// Live market data for a dynamic set of symbols.
pub struct StreamFacade<T: FeedTransport> {
    core: Arc<StreamCore>,
    manager: ConnectionManager<T>,
}

impl<T: FeedTransport> std::fmt::Debug for StreamFacade<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamFacade")
            .field("core", &self.core)
            .field("manager", &self.manager)
            .finish()
    }
}

impl<T: FeedTransport> StreamFacade<T> {
    /// Create a stopped facade speaking the JSON feed protocol.
    #[must_use]
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        Self::with_codec(transport, config, Arc::new(JsonCodec::new()))
    }

    /// Create a stopped facade with a custom codec.
    #[must_use]
    pub fn with_codec(transport: T, config: ConnectionConfig, codec: Arc<dyn FeedCodec>) -> Self {
        let core = Arc::new(StreamCore::new(Arc::clone(&codec)));
        let manager = ConnectionManager::new(Arc::new(transport), codec, config, Arc::clone(&core));
        Self { core, manager }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connect with `token`; see [`ConnectionManager::start`].
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] if the token is missing or rejected.
    pub async fn start(&self, token: impl Into<AuthToken>) -> Result<(), StartError> {
        self.manager.start(&token.into()).await
    }

    /// Close the connection and cancel any pending reconnect.
    pub async fn stop(&self) {
        self.manager.stop().await;
    }

    // -------------------------------------------------------------------------
    // Symbols
    // -------------------------------------------------------------------------

    /// Watch a symbol. Returns `Ok(false)` if it was already watched.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError`] for empty or malformed input.
    pub fn add_symbol(&self, raw: &str) -> Result<bool, SymbolError> {
        let symbol = Symbol::parse(raw)?;
        Ok(self.core.watch(symbol))
    }

    /// Stop watching a symbol and discard its snapshot.
    ///
    /// Returns `Ok(false)` if it was not watched.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError`] for empty or malformed input.
    pub fn remove_symbol(&self, raw: &str) -> Result<bool, SymbolError> {
        let symbol = Symbol::parse(raw)?;
        Ok(self.core.unwatch(&symbol))
    }

    /// Current value for a symbol. Input that is not a valid symbol can
    /// never be watched and reports [`SnapshotLookup::NotWatched`].
    #[must_use]
    pub fn get_snapshot(&self, raw: &str) -> SnapshotLookup {
        Symbol::parse(raw).map_or(SnapshotLookup::NotWatched, |symbol| {
            self.core.snapshot(symbol.as_str())
        })
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Register a callback for every [`StreamEvent`].
    pub fn subscribe_to_changes<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.core.observers().subscribe(Arc::new(callback))
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe_from_changes(&self, id: ObserverId) -> bool {
        self.core.observers().unsubscribe(id)
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.core.connection_state()
    }

    /// Watched symbols in sorted order, with subscription state.
    #[must_use]
    pub fn watched_symbols(&self) -> Vec<(Symbol, SubscriptionState)> {
        self.core.watched()
    }

    /// Frame counters.
    #[must_use]
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.core.diagnostics()
    }

    /// Whether the connection task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.manager.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{FeedSession, TransportError};
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};
    use url::Url;

    /// Transport that never connects.
    struct Unreachable;

    #[async_trait]
    impl FeedTransport for Unreachable {
        async fn connect(&self, _url: &Url) -> Result<FeedSession, TransportError> {
            Err(TransportError::ConnectFailed("unreachable".to_string()))
        }
    }

    fn facade() -> StreamFacade<Unreachable> {
        let config = ConnectionConfig::new(Url::parse("ws://localhost/ws").unwrap());
        StreamFacade::new(Unreachable, config)
    }

    #[test]
    fn add_symbol_validates_input() {
        let facade = facade();
        assert_eq!(facade.add_symbol(""), Err(SymbolError::Empty));
        assert_eq!(facade.add_symbol("   "), Err(SymbolError::Empty));
        assert!(facade.add_symbol("BAD SYMBOL").is_err());
        assert!(facade.watched_symbols().is_empty());
    }

    #[test]
    fn add_is_idempotent_across_case() {
        let facade = facade();
        assert_eq!(facade.add_symbol("aapl"), Ok(true));
        assert_eq!(facade.add_symbol("AAPL"), Ok(false));
        assert_eq!(facade.add_symbol(" Aapl "), Ok(false));
        assert_eq!(facade.watched_symbols().len(), 1);
    }

    #[test]
    fn snapshot_distinguishes_pending_from_unwatched() {
        let facade = facade();
        facade.add_symbol("msft").unwrap();

        assert_eq!(facade.get_snapshot("MSFT"), SnapshotLookup::Pending);
        assert_eq!(facade.get_snapshot("msft"), SnapshotLookup::Pending);
        assert_eq!(facade.get_snapshot("AAPL"), SnapshotLookup::NotWatched);
        assert_eq!(facade.get_snapshot(""), SnapshotLookup::NotWatched);
    }

    #[test]
    fn remove_symbol_reports_whether_watched() {
        let facade = facade();
        facade.add_symbol("AAPL").unwrap();
        assert_eq!(facade.remove_symbol("aapl"), Ok(true));
        assert_eq!(facade.remove_symbol("AAPL"), Ok(false));
        assert_eq!(facade.get_snapshot("AAPL"), SnapshotLookup::NotWatched);
    }

    #[tokio::test]
    async fn start_requires_token() {
        let facade = facade();
        let err = assert_err!(facade.start("").await);
        assert_eq!(err, StartError::AuthRequired);
        assert_eq!(facade.connection_state(), ConnectionState::Disconnected);
        assert!(!facade.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_keeps_retrying_until_stopped() {
        let facade = facade();
        assert_ok!(facade.start("t1").await);
        assert_eq!(facade.connection_state(), ConnectionState::Reconnecting);
        assert!(facade.is_running());

        facade.stop().await;
        assert_eq!(facade.connection_state(), ConnectionState::Disconnected);
        assert!(!facade.is_running());
    }

    #[test]
    fn unsubscribe_from_changes_round_trip() {
        let facade = facade();
        let id = facade.subscribe_to_changes(|_| {});
        assert!(facade.unsubscribe_from_changes(id));
        assert!(!facade.unsubscribe_from_changes(id));
    }
}
