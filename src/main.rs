//! Market Stream - order book and open-order stream service
//!
//! Streams the configured market's order book from the exchange's public
//! WebSocket feed, follows open orders through the backend relay when one is
//! configured, and serves health and metrics over HTTP.

use std::sync::Arc;
use std::time::Duration;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_stream::metrics;
use market_stream::{
    AppState, Config, PrivateStreamManager, PublicStreamConfig, PublicStreamManager, RelayBackend,
    WsConnector,
};

const BOOK_REPORT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Market Stream");

    // Load configuration
    let config = Config::load()?;
    info!(
        exchange = %config.exchange,
        market = ?config.market,
        relay = ?config.relay_endpoint,
        "Configuration loaded"
    );

    let state = Arc::new(AppState::new());

    // Public order book stream
    let public = PublicStreamManager::spawn(
        PublicStreamConfig::from(&config),
        Arc::new(WsConnector),
        state.orderbook.clone(),
        state.activity.scoped("orderbook"),
    );
    public.set_target(config.market.clone(), Some(config.exchange));

    // Private order stream, only with a relay to drive it
    let private = match (&config.relay_endpoint, config.relay_events_endpoint()) {
        (Some(base), Some(events)) => {
            let backend = RelayBackend::spawn(base, &events)?;
            let manager = PrivateStreamManager::spawn(
                Arc::new(backend),
                state.orders.clone(),
                state.activity.scoped("orders"),
                config.reconnect_policy(),
            );
            manager.connect();
            Some(manager)
        }
        _ => {
            info!("No relay configured, private order stream disabled");
            None
        }
    };

    // Start health check server
    let health_state = state.clone();
    let port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, port).await {
            warn!(error = %e, "Health server error");
        }
    });

    // Periodic top-of-book report
    let report_state = state.clone();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(BOOK_REPORT_INTERVAL);
        loop {
            interval.tick().await;
            let book = report_state.orderbook.snapshot();
            let orders = report_state.orders.snapshot();
            info!(
                status = %book.ws_status,
                best_bid = ?book.best_bid(),
                best_ask = ?book.best_ask(),
                spread_bps = ?book.spread_bps(),
                open_orders = orders.len(),
                "Order book status"
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    reporter.abort();
    public.shutdown().await;
    if let Some(private) = private {
        private.shutdown().await;
    }

    info!("Market Stream stopped");
    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let book = state.orderbook.snapshot();
    let orders = state.orders.snapshot();

    Json(serde_json::json!({
        "status": "healthy",
        "component": "market-stream",
        "orderbook": {
            "status": book.ws_status,
            "error": book.ws_error,
            "levels": book.asks.len() + book.bids.len(),
        },
        "orders": {
            "status": orders.ws_status,
            "error": orders.ws_error,
            "open": orders.len(),
        },
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::render().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
