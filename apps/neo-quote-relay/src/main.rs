//! Neo Quote Relay Binary
//!
//! Starts the market data relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin neo-quote-relay -- [PORT]
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_WS_HOST` / `RELAY_WS_PORT`: downstream listener (default: 0.0.0.0:8767)
//! - `RELAY_HEALTH_PORT`: health and metrics port, 0 disables (default: 8087)
//! - `NEO_CREDENTIALS_URL`: credential endpoint
//! - `NEO_CREDENTIALS_TIMEOUT_MS`: per-fetch timeout (default: 5000)
//! - `NEO_CREDENTIALS_POLL_SECS`: credential polling interval (default: 5)
//! - `NEO_FEED_URL`: upstream feed endpoint
//! - `NEO_DEFAULT_BASE_URL`: `baseUrl` when the payload has none
//! - `NEO_RECONNECT_*`: upstream reconnect backoff
//! - `RELAY_ERROR_PAUSE_MS`: broadcast loop pause after a failure (default: 100)
//! - `OTEL_ENABLED`: enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: log filter (default: `neo_quote_relay=info`)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use neo_quote_relay::infrastructure::telemetry;
use neo_quote_relay::{
    BootstrapOutcome, BroadcastLoop, DownstreamServer, HealthServer, HealthServerState,
    HttpCredentialSource, IngestAdapter, NeoSessionFactory, RelayConfig, RelayContext,
    SessionBootstrapper, distribution_queue, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "neo-quote-relay")]
#[command(about = "Kotak Neo market data relay with WebSocket fan-out")]
struct Args {
    /// Downstream WebSocket port (overrides RELAY_WS_PORT)
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!("Starting Neo Quote Relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable");
    }

    let config = RelayConfig::from_env()
        .context("invalid configuration")?
        .with_ws_port(args.port);
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let context = RelayContext::shared();

    // The listener is the only startup step allowed to fail the process
    let ws_addr = config.server.ws_addr();
    let server = DownstreamServer::bind(&ws_addr, Arc::clone(&context))
        .await
        .with_context(|| format!("cannot listen on {ws_addr}"))?;

    let (producer, consumer) = distribution_queue();

    // Broadcast loop
    let broadcast = BroadcastLoop::new(Arc::clone(&context), consumer, config.broadcast);
    let broadcast_handle = tokio::spawn(broadcast.run(shutdown_token.clone()));

    // Health server
    if config.server.health_enabled() {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&context),
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

    // Session bootstrap
    let credentials = HttpCredentialSource::new(&config.credentials)
        .context("failed to build credential client")?;
    let bootstrapper = SessionBootstrapper::new(
        Arc::clone(&context),
        Arc::new(credentials),
        Arc::new(NeoSessionFactory::new(
            config.feed.clone(),
            shutdown_token.clone(),
        )),
        Arc::new(IngestAdapter::new(producer)),
    )
    .with_poll_interval(config.credentials.poll_interval);

    let bootstrap_token = shutdown_token.clone();
    tokio::spawn(async move {
        match bootstrapper.run(bootstrap_token).await {
            BootstrapOutcome::Connected { polls } => {
                tracing::info!(polls, "Upstream session established");
            }
            BootstrapOutcome::Cancelled => {
                tracing::info!("Session bootstrap cancelled");
            }
        }
    });

    // Downstream server
    let server_handle = tokio::spawn(server.run(shutdown_token.clone()));

    tracing::info!(addr = %ws_addr, "Relay ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = server_handle.await;
        let _ = broadcast_handle.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Relay stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        ws_addr = %config.server.ws_addr(),
        health_port = config.server.health_port,
        poll_secs = config.credentials.poll_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        credentials_url = %config.credentials.url,
        feed_url = %config.feed.url,
        "Upstream endpoints"
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
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
