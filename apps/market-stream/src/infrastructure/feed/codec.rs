//! Feed Codec
//!
//! JSON encoding and decoding for the live quote feed.
//!
//! Decoding is two-step: the frame is first parsed as a raw JSON value so the
//! `type` tag can be inspected, then only recognized kinds are parsed into
//! their concrete message types. A well-formed frame with an unknown tag is
//! not an error; it decodes to [`InboundFrame::Other`].

use crate::application::ports::{DecodeError, EncodeError, FeedCodec, InboundFrame};
use crate::domain::subscription::FeedCommand;
use crate::domain::symbol::Symbol;

use super::messages::{ClientMessage, MARKET_DATA_TYPE, MarketDataMessage};

/// JSON codec for the quote feed.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FeedCodec for JsonCodec {
    fn decode(&self, raw: &str) -> Result<InboundFrame, DecodeError> {
        let value: serde_json::Value = serde_json::from_str(raw.trim())?;

        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(DecodeError::MissingTag)?;

        if kind != MARKET_DATA_TYPE {
            return Ok(InboundFrame::Other {
                kind: kind.to_string(),
            });
        }

        let message: MarketDataMessage = serde_json::from_value(value)?;
        let symbol = Symbol::parse(&message.symbol)?;

        Ok(InboundFrame::MarketData {
            symbol,
            fields: message.fields(),
        })
    }

    fn encode(&self, command: &FeedCommand) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(&ClientMessage::from(command))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn decode_market_data() {
        let codec = JsonCodec::new();
        let raw = r#"{"type":"market_data","symbol":"aapl","current":150.2,"high":151,"low":149,"change":1.2,"percent_change":0.8}"#;

        match codec.decode(raw).unwrap() {
            InboundFrame::MarketData { symbol, fields } => {
                assert_eq!(symbol.as_str(), "AAPL");
                assert_eq!(fields.current, Decimal::new(1502, 1));
                assert_eq!(fields.high, Decimal::from(151));
            }
            other @ InboundFrame::Other { .. } => panic!("expected MarketData, got {other:?}"),
        }
    }

    #[test]
    fn decode_unknown_kind_is_not_an_error() {
        let codec = JsonCodec::new();
        let frame = codec.decode(r#"{"type":"heartbeat","ts":1}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Other {
                kind: "heartbeat".to_string()
            }
        );
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("{not json"),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn decode_rejects_non_object() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode("[1,2,3]"),
            Err(DecodeError::NotAnObject)
        ));
    }

    #[test]
    fn decode_rejects_missing_tag() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(r#"{"symbol":"AAPL","current":1}"#),
            Err(DecodeError::MissingTag)
        ));
        assert!(matches!(
            codec.decode(r#"{"type":7}"#),
            Err(DecodeError::MissingTag)
        ));
    }

    #[test]
    fn decode_rejects_market_data_with_missing_fields() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.decode(r#"{"type":"market_data","symbol":"AAPL","current":1}"#),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn decode_rejects_non_numeric_price() {
        let codec = JsonCodec::new();
        let raw = r#"{"type":"market_data","symbol":"AAPL","current":null,"high":1,"low":1,"change":0,"percent_change":0}"#;
        assert!(matches!(codec.decode(raw), Err(DecodeError::Json(_))));
    }

    #[test]
    fn decode_rejects_empty_symbol() {
        let codec = JsonCodec::new();
        let raw = r#"{"type":"market_data","symbol":"  ","current":1,"high":1,"low":1,"change":0,"percent_change":0}"#;
        assert!(matches!(
            codec.decode(raw),
            Err(DecodeError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn encode_subscribe() {
        let codec = JsonCodec::new();
        let json = codec
            .encode(&FeedCommand::Subscribe(Symbol::parse("tsla").unwrap()))
            .unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"TSLA"}"#);
    }
}
