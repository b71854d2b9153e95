//! Stream Client Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment
//! variables (after `dotenvy` has loaded any `.env` file).

use std::time::Duration;

use url::Url;

use crate::domain::symbol::{Symbol, SymbolError};
use crate::infrastructure::feed::{AuthToken, ConnectionConfig, ReconnectConfig};

/// Feed endpoint used when `MARKET_STREAM_URL` is unset.
pub const DEFAULT_URL: &str = "ws://localhost:8080/ws/getlivedata";

/// Feed connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Feed endpoint without the token.
    pub url: Url,
    /// Limit on a single connection attempt.
    pub connect_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter as a fraction of each delay.
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        let reconnect = ReconnectConfig::default();
        Self {
            url: default_url(),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay_initial: reconnect.initial_delay,
            reconnect_delay_max: reconnect.max_delay,
            reconnect_delay_multiplier: reconnect.multiplier,
            reconnect_jitter: reconnect.jitter_factor,
            max_reconnect_attempts: reconnect.max_attempts,
        }
    }
}

impl StreamSettings {
    /// Connection manager configuration.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            connect_timeout: self.connect_timeout,
            reconnect: ReconnectConfig {
                initial_delay: self.reconnect_delay_initial,
                max_delay: self.reconnect_delay_max,
                multiplier: self.reconnect_delay_multiplier,
                jitter_factor: self.reconnect_jitter,
                max_attempts: self.max_reconnect_attempts,
            },
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Bearer token, if configured.
    pub token: Option<AuthToken>,
    /// Symbols to watch at startup.
    pub symbols: Vec<Symbol>,
    /// Feed connection settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL, a startup symbol or a tuning value is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL, a startup symbol or a tuning value is
    /// invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = match lookup("MARKET_STREAM_URL").filter(|v| !v.trim().is_empty()) {
            Some(raw) => parse_url(raw.trim())?,
            None => default_url(),
        };

        let token = lookup("MARKET_STREAM_TOKEN")
            .map(AuthToken::new)
            .filter(|token| !token.is_empty());

        let symbols = lookup("MARKET_STREAM_SYMBOLS")
            .map(|raw| parse_symbols(&raw))
            .transpose()?
            .unwrap_or_default();

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            url,
            connect_timeout: require_nonzero(
                "MARKET_STREAM_CONNECT_TIMEOUT_SECS",
                parse_duration_secs(
                    &lookup,
                    "MARKET_STREAM_CONNECT_TIMEOUT_SECS",
                    defaults.connect_timeout,
                ),
            )?,
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: require_nonzero(
                "MARKET_STREAM_RECONNECT_DELAY_MAX_SECS",
                parse_duration_secs(
                    &lookup,
                    "MARKET_STREAM_RECONNECT_DELAY_MAX_SECS",
                    defaults.reconnect_delay_max,
                ),
            )?,
            reconnect_delay_multiplier: parse_f64_checked(
                &lookup,
                "MARKET_STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
                |v| v.is_finite() && v > 0.0,
                "must be a finite number greater than 0",
            )?,
            reconnect_jitter: parse_f64_checked(
                &lookup,
                "MARKET_STREAM_RECONNECT_JITTER",
                defaults.reconnect_jitter,
                |v| (0.0..=1.0).contains(&v),
                "must be a fraction between 0 and 1",
            )?,
            max_reconnect_attempts: parse_or(
                &lookup,
                "MARKET_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: parse_or(
                &lookup,
                "MARKET_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        Ok(Self {
            token,
            symbols,
            stream,
            server,
        })
    }

    /// The token, or an error naming the variable to set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] if no token is configured.
    pub fn require_token(&self) -> Result<&AuthToken, ConfigError> {
        self.token
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("MARKET_STREAM_TOKEN".to_string()))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// The feed URL is unusable.
    #[error("invalid feed URL {url:?}: {reason}")]
    InvalidUrl {
        /// The configured value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A startup symbol is invalid.
    #[error("invalid symbol in MARKET_STREAM_SYMBOLS: {0}")]
    InvalidSymbol(#[from] SymbolError),
    /// A numeric setting is out of range.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// The environment variable.
        key: String,
        /// The configured value.
        value: String,
        /// The accepted range.
        reason: &'static str,
    },
}

fn default_url() -> Url {
    Url::parse(DEFAULT_URL).unwrap_or_else(|_| unreachable!("default feed URL is valid"))
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other:?}, expected ws or wss"),
        }),
    }
}

fn parse_symbols(raw: &str) -> Result<Vec<Symbol>, SymbolError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Symbol::parse)
        .collect()
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Like [`parse_or`], but a value that parses and fails `valid` is an
/// error rather than a silent fallback. `NaN` and `inf` parse as `f64`.
fn parse_f64_checked(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: f64,
    valid: impl Fn(f64) -> bool,
    reason: &'static str,
) -> Result<f64, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if valid(value) => Ok(value),
        Ok(_) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
            reason,
        }),
        Err(_) => Ok(default),
    }
}

fn require_nonzero(key: &str, duration: Duration) -> Result<Duration, ConfigError> {
    if duration.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0",
        });
    }
    Ok(duration)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
