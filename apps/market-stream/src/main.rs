//! Market Stream Binary
//!
//! Connects to the live quote feed, watches the configured symbols and logs
//! every snapshot change until interrupted.
//!
//! # Usage
//!
//! ```bash
//! MARKET_STREAM_TOKEN=... MARKET_STREAM_SYMBOLS=AAPL,MSFT cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKET_STREAM_TOKEN`: bearer token for the feed
//!
//! ## Optional
//! - `MARKET_STREAM_URL`: feed endpoint (default: ws://localhost:8080/ws/getlivedata)
//! - `MARKET_STREAM_SYMBOLS`: comma-separated symbols to watch
//! - `MARKET_STREAM_CONNECT_TIMEOUT_SECS`: connect timeout (default: 10)
//! - `MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS`: first backoff delay (default: 500)
//! - `MARKET_STREAM_RECONNECT_DELAY_MAX_SECS`: backoff cap (default: 30)
//! - `MARKET_STREAM_RECONNECT_DELAY_MULTIPLIER`: backoff growth (default: 2.0)
//! - `MARKET_STREAM_RECONNECT_JITTER`: jitter fraction (default: 0.1)
//! - `MARKET_STREAM_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `MARKET_STREAM_HEALTH_PORT`: health HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: export traces over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;

use anyhow::Context;
use market_stream::infrastructure::health::{HealthServer, HealthServerState, StreamStatus};
use market_stream::infrastructure::telemetry;
use market_stream::{StreamConfig, StreamEvent, StreamFacade, WebSocketTransport, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting market stream client");

    init_metrics().context("failed to install metrics recorder")?;

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);
    let token = config.require_token()?.clone();

    let shutdown_token = CancellationToken::new();

    let facade = Arc::new(StreamFacade::new(
        WebSocketTransport::new(),
        config.stream.connection_config(),
    ));
    facade.subscribe_to_changes(log_event);

    for symbol in &config.symbols {
        facade.add_symbol(symbol.as_str())?;
    }

    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&facade) as Arc<dyn StreamStatus>,
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tokio::select! {
        result = facade.start(token) => {
            result.context("feed connection failed")?;
            tracing::info!(
                state = %facade.connection_state(),
                watched = config.symbols.len(),
                "Market stream running"
            );
        }
        () = await_shutdown(shutdown_token.clone()) => {
            facade.stop().await;
            return Ok(());
        }
    }

    await_shutdown(shutdown_token).await;

    facade.stop().await;
    let stats = facade.diagnostics();
    tracing::info!(
        received = stats.received,
        accepted = stats.accepted,
        dropped = stats.dropped(),
        "Market stream stopped"
    );
    Ok(())
}

/// Log every change the stream reports.
fn log_event(event: &StreamEvent) {
    match event {
        StreamEvent::ConnectionStateChanged { from, to } => {
            tracing::info!(%from, %to, "Feed connection state changed");
        }
        StreamEvent::SnapshotUpdated(snapshot) => {
            tracing::info!(
                symbol = %snapshot.symbol,
                current = %snapshot.current,
                high = %snapshot.high,
                low = %snapshot.low,
                change = %snapshot.change,
                percent_change = %snapshot.percent_change,
                direction = ?snapshot.direction(),
                "Quote"
            );
        }
        StreamEvent::SnapshotEvicted(symbol) => {
            tracing::info!(%symbol, "Stopped watching");
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        url = %config.stream.url,
        symbols = config.symbols.len(),
        health_port = config.server.health_port,
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }

    shutdown_token.cancel();
}
