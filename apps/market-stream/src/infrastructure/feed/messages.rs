//! Feed WebSocket Message Types
//!
//! Wire format types for the live quote feed. Every frame is a JSON object
//! tagged by a `type` field.
//!
//! # Message Types
//!
//! ## Client -> Feed
//! - `subscribe`: start streaming a symbol
//! - `unsubscribe`: stop streaming a symbol
//!
//! ## Feed -> Client
//! - `market_data`: price update for one symbol
//!
//! Any other inbound `type` is well-formed but ignored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::snapshot::QuoteFields;
use crate::domain::subscription::FeedCommand;

/// Tag value for market data frames.
pub const MARKET_DATA_TYPE: &str = "market_data";

// =============================================================================
// Client -> Feed
// =============================================================================

/// Outbound request.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribe", "symbol": "AAPL"}
/// {"type": "unsubscribe", "symbol": "AAPL"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Start streaming a symbol.
    Subscribe {
        /// Upper-case ticker.
        symbol: String,
    },
    /// Stop streaming a symbol.
    Unsubscribe {
        /// Upper-case ticker.
        symbol: String,
    },
}

impl From<&FeedCommand> for ClientMessage {
    fn from(command: &FeedCommand) -> Self {
        match command {
            FeedCommand::Subscribe(symbol) => Self::Subscribe {
                symbol: symbol.to_string(),
            },
            FeedCommand::Unsubscribe(symbol) => Self::Unsubscribe {
                symbol: symbol.to_string(),
            },
        }
    }
}

// =============================================================================
// Feed -> Client
// =============================================================================

/// Market data update.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "type": "market_data",
///   "symbol": "AAPL",
///   "current": 150.2,
///   "high": 151,
///   "low": 149,
///   "change": 1.2,
///   "percent_change": 0.8
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDataMessage {
    /// Ticker as sent by the feed (not yet normalized).
    pub symbol: String,
    /// Last traded price.
    pub current: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Absolute change.
    pub change: Decimal,
    /// Percent change.
    pub percent_change: Decimal,
}

impl MarketDataMessage {
    /// The numeric fields of the update.
    #[must_use]
    pub const fn fields(&self) -> QuoteFields {
        QuoteFields {
            current: self.current,
            high: self.high,
            low: self.low,
            change: self.change,
            percent_change: self.percent_change,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::symbol::Symbol;

    #[test]
    fn subscribe_wire_format() {
        let command = FeedCommand::Subscribe(Symbol::parse("aapl").unwrap());
        let json = serde_json::to_string(&ClientMessage::from(&command)).unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"AAPL"}"#);
    }

    #[test]
    fn unsubscribe_wire_format() {
        let command = FeedCommand::Unsubscribe(Symbol::parse("MSFT").unwrap());
        let json = serde_json::to_string(&ClientMessage::from(&command)).unwrap();
        assert_eq!(json, r#"{"type":"unsubscribe","symbol":"MSFT"}"#);
    }

    #[test]
    fn market_data_accepts_integer_and_float_numbers() {
        let json = r#"{"symbol":"AAPL","current":150.2,"high":151,"low":149,"change":1.2,"percent_change":0.8}"#;
        let msg: MarketDataMessage = serde_json::from_str(json).unwrap();

        assert_eq!(msg.current, Decimal::new(1502, 1));
        assert_eq!(msg.high, Decimal::from(151));
        assert_eq!(msg.low, Decimal::from(149));
        assert_eq!(msg.change, Decimal::new(12, 1));
        assert_eq!(msg.percent_change, Decimal::new(8, 1));
    }

    #[test]
    fn market_data_requires_all_fields() {
        let json = r#"{"symbol":"AAPL","current":150.2}"#;
        assert!(serde_json::from_str::<MarketDataMessage>(json).is_err());
    }
}
