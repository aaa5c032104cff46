//! LLM Failover Gateway
//!
//! Single-binary Rust service that:
//! 1. Accepts Anthropic Messages and OpenAI Chat Completions requests
//! 2. Picks the highest-priority provider for the protocol that is not
//!    cooling down
//! 3. Fails over to the next provider on rate limits, credential failures,
//!    server errors, model rejections and connection errors
//! 4. Relays the first successful (streaming) response to the client

mod config;
mod metrics;
mod proxy;
mod transport;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use failover::{CooldownTracker, Orchestrator, Protocol, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::Config;
use crate::transport::HttpTransport;

/// Time allowed for in-flight requests to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/v1/messages/count_tokens", post(count_tokens_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting llm-failover-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle = metrics::install_recorder();

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let listen_addr = config.server.bind_addr();
    let max_connections = config.server.max_connections;
    info!(
        listen_addr = %listen_addr,
        max_connections,
        providers = config.providers.len(),
        retry_on_status = ?config.failover.retry_on_status,
        "configuration loaded"
    );

    let registry = Registry::new(config.providers).context("invalid provider registry")?;
    let transport = HttpTransport::new().context("failed to build HTTP client")?;
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        Arc::new(CooldownTracker::new()),
        config.failover,
        Arc::new(transport),
    );

    let app_state = AppState {
        orchestrator: Arc::new(orchestrator),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, max_connections);

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timeout starts when the shutdown signal fires: notify the
    // server to drain, then race the drain against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

async fn messages_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    proxy::forward_request(
        &state.orchestrator,
        Protocol::Anthropic,
        "/v1/messages",
        "messages",
        request,
        new_request_id(),
    )
    .await
}

async fn chat_completions_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Response {
    proxy::forward_request(
        &state.orchestrator,
        Protocol::OpenAi,
        "/v1/chat/completions",
        "chat_completions",
        request,
        new_request_id(),
    )
    .await
}

/// Token counting is answered locally; no provider is contacted.
async fn count_tokens_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "input_tokens": 0 }))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        axum::Json(serde_json::json!({ "error": "Not found" })),
    )
}

/// Health endpoint: provider count, cooldown entry count and the providers
/// currently cooling down. Read-only.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let cooldowns = orchestrator.cooldowns();
    let body = serde_json::json!({
        "status": "ok",
        "providers": orchestrator.registry().len(),
        "cooldowns": cooldowns.len(),
        "cooling_down": cooldowns.snapshot(tokio::time::Instant::now()),
    });

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint; returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
