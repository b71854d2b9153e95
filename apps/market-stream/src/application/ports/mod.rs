//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedTransport`: opens the streaming connection to the quote feed
//! - `FeedCodec`: turns wire frames into [`InboundFrame`]s and
//!   [`FeedCommand`]s into wire frames

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use url::Url;

use crate::domain::snapshot::QuoteFields;
use crate::domain::subscription::FeedCommand;
use crate::domain::symbol::{Symbol, SymbolError};

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a [`FeedTransport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The feed refused the bearer token.
    #[error("feed rejected credentials: {0}")]
    Unauthorized(String),

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The connection attempt did not finish in time.
    #[error("connection attempt timed out")]
    Timeout,

    /// An established connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The connection is closed.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying cannot help.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::ConnectFailed(_) => "connect_failed",
            Self::Timeout => "timeout",
            Self::Connection(_) => "connection",
            Self::Closed => "closed",
        }
    }
}

/// Outbound half of an open connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of an open connection. The stream ends when the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open connection, split into its two halves.
pub struct FeedSession {
    /// Text frames to the feed.
    pub sink: FrameSink,
    /// Text frames from the feed.
    pub stream: FrameStream,
}

/// Opens connections to the quote feed.
#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    /// Connect to `url` (which already carries the bearer token).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Unauthorized`] if the feed rejects the
    /// token, and another variant for transient failures.
    async fn connect(&self, url: &Url) -> Result<FeedSession, TransportError>;
}

// =============================================================================
// Codec
// =============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// Price update for one symbol.
    MarketData {
        /// Normalized symbol.
        symbol: Symbol,
        /// Tick values.
        fields: QuoteFields,
    },
    /// A well-formed frame of a kind this client does not handle.
    Other {
        /// Value of the frame's tag field.
        kind: String,
    },
}

/// Reasons an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not valid JSON, or fields of the wrong shape.
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// Object without a string `type` tag.
    #[error("frame has no type tag")]
    MissingTag,

    /// Market data for an unusable symbol.
    #[error("invalid symbol in frame: {0}")]
    InvalidSymbol(#[from] SymbolError),
}

impl DecodeError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::NotAnObject => "not_an_object",
            Self::MissingTag => "missing_tag",
            Self::InvalidSymbol(_) => "invalid_symbol",
        }
    }
}

/// Errors encoding an outbound command.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Serialization failed.
    #[error("failed to encode command: {0}")]
    Json(#[from] serde_json::Error),
}

/// Wire format for the feed.
pub trait FeedCodec: Send + Sync + 'static {
    /// Decode one inbound text frame.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for malformed frames. Unknown but well-formed
    /// kinds decode to [`InboundFrame::Other`].
    fn decode(&self, raw: &str) -> Result<InboundFrame, DecodeError>;

    /// Encode one outbound command.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if serialization fails.
    fn encode(&self, command: &FeedCommand) -> Result<String, EncodeError>;
}
