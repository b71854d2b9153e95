//! Connection Manager
//!
//! Owns the single feed connection. A background task connects, replays the
//! desired symbols, pumps frames into the [`StreamCore`] and reconnects with
//! backoff when the connection is lost.
//!
//! # Lifecycle
//!
//! - `start` fails fast without a token, is a no-op while already running,
//!   and waits for the first attempt so an auth rejection reaches the caller.
//! - A transient failure (refused, timed out, dropped) moves to Reconnecting
//!   and retries after the next backoff delay.
//! - An auth rejection, or running out of attempts, moves to Failed and ends
//!   the task. A later `start` may retry.
//! - `stop` cancels the task wherever it is (connecting, connected or
//!   sleeping) and waits for it to finish; dropping the manager cancels too.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::application::ports::{FeedCodec, FeedSession, FeedTransport, TransportError};
use crate::application::services::stream::StreamCore;
use crate::domain::connection::ConnectionState;
use crate::domain::subscription::FeedCommand;
use crate::infrastructure::metrics;

use super::reconnect::{ReconnectConfig, ReconnectPolicy};

/// How long a graceful close may take before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// =============================================================================
// Configuration
// =============================================================================

/// Opaque bearer token for the feed.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a token string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Whether the token is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthToken([REDACTED])")
    }
}

impl From<&str> for AuthToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for AuthToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Feed endpoint without the token.
    pub url: Url,
    /// Limit on a single connection attempt.
    pub connect_timeout: Duration,
    /// Backoff between attempts.
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    /// Defaults for the given endpoint.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// The endpoint with `token` in its query string.
    ///
    /// Any `token` parameter already on the base URL is replaced.
    #[must_use]
    pub fn endpoint(&self, token: &AuthToken) -> Url {
        let mut url = self.url.clone();
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "token")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("token", token.expose());
        url
    }
}

/// Why `start` did not leave the connection running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    /// No token was supplied.
    #[error("an auth token is required to connect")]
    AuthRequired,

    /// The feed rejected the token.
    #[error("feed rejected the auth token: {0}")]
    AuthRejected(String),

    /// `stop` was called before the first attempt finished.
    #[error("stopped before the first connection attempt finished")]
    Stopped,
}

// =============================================================================
// Connection Manager
// =============================================================================

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs the connection task for one [`StreamCore`].
pub struct ConnectionManager<T: FeedTransport> {
    transport: Arc<T>,
    codec: Arc<dyn FeedCodec>,
    config: ConnectionConfig,
    core: Arc<StreamCore>,
    running: Mutex<Option<Running>>,
}

impl<T: FeedTransport> std::fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("running", &self.running.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl<T: FeedTransport> ConnectionManager<T> {
    /// Create a stopped manager.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        codec: Arc<dyn FeedCodec>,
        config: ConnectionConfig,
        core: Arc<StreamCore>,
    ) -> Self {
        Self {
            transport,
            codec,
            config,
            core,
            running: Mutex::new(None),
        }
    }

    /// Connection settings.
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Start connecting with `token`.
    ///
    /// Resolves once the first attempt has either connected or failed.
    /// Transient failures still resolve `Ok` because the task keeps retrying
    /// in the background.
    ///
    /// # Errors
    ///
    /// - [`StartError::AuthRequired`] if the token is blank
    /// - [`StartError::AuthRejected`] if the feed refused the token; the
    ///   state is then Failed
    /// - [`StartError::Stopped`] if `stop` interrupted the first attempt
    pub async fn start(&self, token: &AuthToken) -> Result<(), StartError> {
        if token.is_empty() {
            return Err(StartError::AuthRequired);
        }

        let state = self.core.connection_state();
        if self.is_running() {
            if state.is_active() {
                tracing::debug!("Connection already started");
                return Ok(());
            }
        } else if matches!(
            state,
            ConnectionState::Connected | ConnectionState::Reconnecting
        ) {
            // Only the task sets these; with the task gone the state is stale.
            // Connecting without a task is another `start` mid-spawn.
            tracing::warn!(%state, "Connection task ended without settling; resetting");
            self.core.detach(ConnectionState::Disconnected);
        }

        // Observers run inside the transition, so it happens before the
        // lock is taken. Losing the race to another `start` is a no-op.
        if !self.core.transition(ConnectionState::Connecting) {
            return Ok(());
        }

        let first_attempt = {
            let mut running = self.running.lock();
            if let Some(previous) = running.take() {
                previous.cancel.cancel();
            }

            let (first_tx, first_rx) = oneshot::channel();
            let cancel = CancellationToken::new();
            let task = ConnectionTask {
                transport: Arc::clone(&self.transport),
                codec: Arc::clone(&self.codec),
                core: Arc::clone(&self.core),
                endpoint: self.config.endpoint(token),
                connect_timeout: self.config.connect_timeout,
                policy: ReconnectPolicy::new(self.config.reconnect.clone()),
                cancel: cancel.clone(),
                first_attempt: Some(first_tx),
            };

            tracing::info!(url = %self.config.url, "Starting feed connection");
            *running = Some(Running {
                cancel,
                handle: tokio::spawn(task.run()),
            });
            first_rx
        };

        match first_attempt.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StartError::AuthRejected(e.to_string())),
            Err(_) => Err(StartError::Stopped),
        }
    }

    /// Stop the connection task and wait for it to finish.
    ///
    /// Afterwards the state is Disconnected and no further frames are
    /// handled.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(Running { cancel, handle }) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Connection task ended abnormally");
            }
        }
        self.core.detach(ConnectionState::Disconnected);
    }

    /// Whether a connection task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}

impl<T: FeedTransport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// How a connected session ended.
enum SessionEnd {
    Cancelled,
    Lost(TransportError),
}

struct ConnectionTask<T: FeedTransport> {
    transport: Arc<T>,
    codec: Arc<dyn FeedCodec>,
    core: Arc<StreamCore>,
    endpoint: Url,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    first_attempt: Option<oneshot::Sender<Result<(), TransportError>>>,
}

impl<T: FeedTransport> ConnectionTask<T> {
    async fn run(mut self) {
        loop {
            let session_id = Uuid::new_v4();
            let span = tracing::info_span!("feed_session", %session_id);

            let connected = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                result = tokio::time::timeout(
                    self.connect_timeout,
                    self.transport.connect(&self.endpoint),
                ) => result.unwrap_or(Err(TransportError::Timeout)),
            };

            match connected {
                Ok(session) => {
                    self.policy.reset();

                    match self.drive(session).instrument(span).await {
                        SessionEnd::Cancelled => return,
                        SessionEnd::Lost(e) => {
                            tracing::warn!(%session_id, error = %e, "Feed connection lost");
                            metrics::record_transport_error(e.kind());
                        }
                    }
                }
                Err(e) if e.is_terminal() => {
                    tracing::error!(error = %e, "Feed rejected credentials; giving up");
                    metrics::record_transport_error(e.kind());
                    self.core.detach(ConnectionState::Failed);
                    self.report_first(Err(e));
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed connection attempt failed");
                    metrics::record_transport_error(e.kind());
                }
            }

            self.core.detach(ConnectionState::Reconnecting);
            self.report_first(Ok(()));

            let Some(delay) = self.policy.next_delay() else {
                tracing::error!(
                    attempts = self.policy.attempt_count(),
                    "Reconnect attempts exhausted"
                );
                self.core.detach(ConnectionState::Failed);
                return;
            };

            metrics::record_reconnect();
            tracing::info!(
                attempt = self.policy.attempt_count(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to feed"
            );

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pump one open session until it ends.
    async fn drive(&mut self, session: FeedSession) -> SessionEnd {
        let FeedSession {
            mut sink,
            mut stream,
        } = session;
        let (link, mut outbox) = mpsc::unbounded_channel::<FeedCommand>();

        if self.core.attach(link).is_none() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
            return SessionEnd::Cancelled;
        }
        self.report_first(Ok(()));

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
                    return SessionEnd::Cancelled;
                }
                command = outbox.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Lost(TransportError::Closed);
                    };
                    let text = match self.codec.encode(&command) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::error!(error = %e, command = command.kind(), "Dropping unencodable command");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(text).await {
                        return SessionEnd::Lost(e);
                    }
                    tracing::debug!(command = command.kind(), symbol = %command.symbol(), "Sent command");
                    metrics::record_command_sent(command.kind());
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        self.core.handle_frame(&text);
                    }
                    Some(Err(e)) => return SessionEnd::Lost(e),
                    None => return SessionEnd::Lost(TransportError::Closed),
                },
            }
        }
    }

    fn report_first(&mut self, outcome: Result<(), TransportError>) {
        if let Some(tx) = self.first_attempt.take() {
            let _ = tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_redacted_in_debug() {
        let token = AuthToken::new("secret-value");
        assert_eq!(format!("{token:?}"), "AuthToken([REDACTED])");
        assert_eq!(token.expose(), "secret-value");
    }

    #[test]
    fn blank_token_is_empty() {
        assert!(AuthToken::new("").is_empty());
        assert!(AuthToken::new("  ").is_empty());
        assert!(!AuthToken::new("t1").is_empty());
    }

    #[test]
    fn endpoint_appends_encoded_token() {
        let config = ConnectionConfig::new(Url::parse("wss://feed.example/ws/getlivedata").unwrap());
        let url = config.endpoint(&AuthToken::new("a b&c=d"));
        assert_eq!(
            url.as_str(),
            "wss://feed.example/ws/getlivedata?token=a+b%26c%3Dd"
        );
    }

    #[test]
    fn endpoint_keeps_other_params_and_replaces_token() {
        let config = ConnectionConfig::new(
            Url::parse("ws://localhost:8080/ws?region=us&token=old").unwrap(),
        );
        let url = config.endpoint(&AuthToken::new("t1"));

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("region".to_string(), "us".to_string()),
                ("token".to_string(), "t1".to_string()),
            ]
        );
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn default_connect_timeout() {
        let config = ConnectionConfig::new(Url::parse("ws://localhost/ws").unwrap());
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }
}
