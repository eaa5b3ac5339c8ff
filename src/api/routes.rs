//! Router construction and server startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    routing::{get, post},
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::generate::ask_ai;
use super::types::{HealthResponse, ProviderEntry, ProvidersResponse};
use crate::config::Config;
use crate::llm::{HuggingFaceClient, InferenceProvider};
use crate::providers::ProviderRegistry;
use crate::quota::QuotaTracker;

/// Shared state for all handlers.
pub struct AppState {
    pub config: Config,
    pub registry: ProviderRegistry,
    pub quota: Arc<QuotaTracker>,
    pub llm: Arc<dyn InferenceProvider>,
}

impl AppState {
    pub fn new(config: Config, llm: Arc<dyn InferenceProvider>) -> Self {
        let quota = Arc::new(QuotaTracker::new(
            config.max_requests_per_ip,
            config.quota_window,
        ));
        Self {
            config,
            registry: ProviderRegistry::new(),
            quota,
            llm,
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    let api = Router::new()
        .route("/api/ask-ai", post(ask_ai))
        .route("/api/providers", get(list_providers))
        .layer(trace_layer);

    Router::new()
        .merge(api)
        .route("/api/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let llm = Arc::new(HuggingFaceClient::new(config.inference_base_url.clone()));
    let state = Arc::new(AppState::new(config, llm));

    let shutdown = CancellationToken::new();
    let sweeper = state.quota.spawn_sweeper(shutdown.clone());

    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Listening on {} (model {}, {} anonymous requests per client)",
        addr, state.config.model_id, state.config.max_requests_per_ip
    );

    let app = router(state);
    let signal = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        signal.cancel();
    })
    .await?;

    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }
    Ok(())
}

async fn list_providers(State(state): State<Arc<AppState>>) -> Json<ProvidersResponse> {
    let providers = state
        .registry
        .list()
        .into_iter()
        .map(|(key, p)| ProviderEntry {
            key: key.to_string(),
            id: p.id.clone(),
            name: p.name.clone(),
            max_tokens: p.max_tokens,
        })
        .collect();

    Json(ProvidersResponse {
        ok: true,
        default: state.registry.default_key().to_string(),
        providers,
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
