//! WebSocket Transport
//!
//! [`FeedTransport`] over `tokio-tungstenite`. The connection is split into a
//! text-frame sink and a text-frame stream; control frames are handled here
//! and never reach the application.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message, http::StatusCode};
use url::Url;

use crate::application::ports::{FeedSession, FeedTransport, TransportError};

/// Connects to the feed over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Default, Clone)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<FeedSession, TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(map_handshake_error)?;

        tracing::debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Connection(e.to_string()))
            .with(|text: String| future::ok::<_, TransportError>(Message::Text(text.into())));

        let stream = read
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(Message::Binary(bytes)) => {
                        tracing::debug!(len = bytes.len(), "Ignoring binary frame");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::Connection(e.to_string()))),
                })
            });

        Ok(FeedSession {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn map_handshake_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::Http(response) => classify_status(response.status()),
        other => TransportError::ConnectFailed(other.to_string()),
    }
}

/// HTTP 401/403 on the upgrade means the token was refused.
fn classify_status(status: StatusCode) -> TransportError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        TransportError::Unauthorized(format!("HTTP {status}"))
    } else {
        TransportError::ConnectFailed(format!("HTTP {status}"))
    }
}
