//! Live Quote Feed Adapter
//!
//! WebSocket client for the quote feed: wire messages, the JSON codec, the
//! reconnecting connection manager and its backoff policy.

pub mod codec;
pub mod connection;
pub mod messages;
pub mod reconnect;
pub mod websocket;

pub use codec::JsonCodec;
pub use connection::{AuthToken, ConnectionConfig, ConnectionManager, StartError};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use websocket::WebSocketTransport;
