//! Market Watch Server Binary
//!
//! Starts the watch list synchronization service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-watch
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_WATCH_WS_PORT`: WebSocket port (default: 8090)
//! - `MARKET_WATCH_HEALTH_PORT`: Health check and metrics HTTP port (default: 8091)
//! - `MARKET_WATCH_MAX_WATCH_LIMIT`: Maximum watched symbols (default: 10)
//! - `MARKET_WATCH_DEFAULT_SYMBOLS`: Initial watch list (default: AAPL,MSFT,AMZN,GOOG)
//! - `MARKET_WATCH_STORE`: memory | redis (default: memory)
//! - `REDIS_URL`: Redis URL (default: <redis://127.0.0.1:6379>)
//! - `MARKET_WATCH_REDIS_KEY`: Sorted-set key (default: market-watch:symbols)
//! - `MARKET_WATCH_UNIVERSE`: Inline tradeable symbols
//! - `MARKET_WATCH_UNIVERSE_FILE`: File of tradeable symbols, re-read periodically
//! - `MARKET_WATCH_UNIVERSE_REFRESH_SECS`: Universe file refresh interval (default: 3600)
//! - `MARKET_WATCH_SESSION_BUFFER`: Per-session queue capacity (default: 256)
//! - `MARKET_WATCH_CONNECT_TIMEOUT_MS`: Handshake bound (default: 30000)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-watch)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use market_watch::infrastructure::universe::{UniverseRefresher, resolve_universe};
use market_watch::{
    BroadcastHub, HealthServer, HealthServerState, MarketWatchServer, WatchConfig, WatchRules,
    WebSocketAcceptor, create_store, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the accepted-session queue between acceptor and server.
const ACCEPT_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = init_telemetry();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    tracing::info!("Starting Market Watch");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics recorder unavailable, /metrics disabled");
    }

    let config = WatchConfig::from_env()?;
    log_config(&config);

    let universe = resolve_universe(&config.universe, &config.watch.default_symbols).await?;
    let rules = WatchRules::new(universe.clone(), config.watch.max_watch_limit);
    let store = create_store(&config.store, rules)?;

    let shutdown_token = CancellationToken::new();
    let broadcast_hub = Arc::new(BroadcastHub::new());

    let server = Arc::new(MarketWatchServer::new(
        store,
        Arc::clone(&broadcast_hub),
        config.watch.default_symbols.clone(),
        shutdown_token.clone(),
    ));

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&server),
        Arc::clone(&broadcast_hub),
        config.watch.max_watch_limit,
        config.store.kind,
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

    // Keep the universe file fresh
    if let Some(refresher) = UniverseRefresher::new(universe, &config.universe) {
        drop(refresher.spawn(shutdown_token.clone()));
    }

    // Spawn WebSocket acceptor
    let ws_addr = SocketAddr::from(([0, 0, 0, 0], config.server.ws_port));
    let acceptor = WebSocketAcceptor::bind(ws_addr, config.session.clone()).await?;
    let (session_tx, session_rx) = mpsc::channel(ACCEPT_QUEUE);
    tokio::spawn(acceptor.run(session_tx, shutdown_token.clone()));

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tracing::info!("Market watch ready");

    let result = server.init(session_rx).await;
    shutdown_token.cancel();

    match result {
        Ok(()) => {
            tracing::info!("Market watch stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Market watch failed");
            Err(e.into())
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &WatchConfig) {
    tracing::info!(
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        store = config.store.kind.as_str(),
        max_watch_limit = config.watch.max_watch_limit,
        "Configuration loaded"
    );
    tracing::debug!(
        default_symbols = ?config.watch.default_symbols,
        universe_file = ?config.universe.file,
        "Watch list defaults"
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
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
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
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    // Force exit if teardown hangs
    tokio::time::sleep(SHUTDOWN_TIMEOUT).await;
    tracing::error!("Graceful shutdown timed out");
    std::process::exit(1);
}
