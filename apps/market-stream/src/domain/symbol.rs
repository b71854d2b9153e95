//! Ticker Symbols
//!
//! Case-normalized ticker identifiers. Every symbol entering the subsystem,
//! whether typed by the user or received on the feed, goes through
//! [`Symbol::parse`] so that `"aapl"`, `" AAPL "` and `"AAPL"` compare equal.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum accepted ticker length.
pub const MAX_SYMBOL_LEN: usize = 15;

/// Errors produced when parsing a raw symbol string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Input was empty or whitespace only.
    #[error("symbol cannot be empty")]
    Empty,

    /// Input exceeded [`MAX_SYMBOL_LEN`].
    #[error("symbol '{0}' exceeds {MAX_SYMBOL_LEN} characters")]
    TooLong(String),

    /// Input contained a character outside `A-Z`, `0-9`, `.`, `-`, `^`, `=`.
    #[error("symbol '{symbol}' contains invalid character '{invalid}'")]
    InvalidCharacter {
        /// The offending input (normalized).
        symbol: String,
        /// First invalid character.
        invalid: char,
    },
}

/// An upper-case ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Normalize and validate a raw symbol.
    ///
    /// Leading/trailing whitespace is trimmed and the result upper-cased.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError`] if the trimmed input is empty, too long, or
    /// contains characters that never appear in a ticker.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let normalized = raw.trim().to_uppercase();

        if normalized.is_empty() {
            return Err(SymbolError::Empty);
        }
        if normalized.chars().count() > MAX_SYMBOL_LEN {
            return Err(SymbolError::TooLong(normalized));
        }
        if let Some(invalid) = normalized
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=')))
        {
            return Err(SymbolError::InvalidCharacter {
                symbol: normalized,
                invalid,
            });
        }

        Ok(Self(normalized))
    }

    /// The normalized ticker text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Symbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("aapl", "AAPL" ; "lowercase")]
    #[test_case("  msft ", "MSFT" ; "surrounding whitespace")]
    #[test_case("BRK.B", "BRK.B" ; "share class")]
    #[test_case("^gspc", "^GSPC" ; "index")]
    #[test_case("eurusd=x", "EURUSD=X" ; "fx pair")]
    fn parse_normalizes(raw: &str, expected: &str) {
        assert_eq!(Symbol::parse(raw).unwrap().as_str(), expected);
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    fn parse_rejects_empty(raw: &str) {
        assert_eq!(Symbol::parse(raw), Err(SymbolError::Empty));
    }

    #[test]
    fn parse_rejects_invalid_character() {
        let err = Symbol::parse("AA PL").unwrap_err();
        assert_eq!(
            err,
            SymbolError::InvalidCharacter {
                symbol: "AA PL".to_string(),
                invalid: ' ',
            }
        );
    }

    #[test]
    fn parse_rejects_overlong() {
        assert!(matches!(
            Symbol::parse("ABCDEFGHIJKLMNOP"),
            Err(SymbolError::TooLong(_))
        ));
    }

    #[test]
    fn equality_after_normalization() {
        assert_eq!(Symbol::parse("aapl").unwrap(), Symbol::parse("AAPL").unwrap());
    }

    #[test]
    fn serde_normalizes_on_deserialize() {
        let symbol: Symbol = serde_json::from_str("\"tsla\"").unwrap();
        assert_eq!(symbol.as_str(), "TSLA");
        assert_eq!(serde_json::to_string(&symbol).unwrap(), "\"TSLA\"");
    }
}
