//! `POST /api/ask-ai` - request orchestration.
//!
//! Order of checks: required fields, credential, anonymous quota, provider
//! budget. Only then is the upstream opened. Streaming headers are fixed
//! before the first byte is relayed.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, ConnectInfo, State},
    http::{header, HeaderMap, HeaderName},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::ApiError;
use super::identity::{caller_token, client_identity, Credential};
use super::routes::AppState;
use super::types::GenerationRequest;
use crate::budget;
use crate::driver::{self, Generation, Ingested, StreamSession};
use crate::providers::ProviderRegistry;

/// Chunks buffered between the relay task and the response body.
const RELAY_BUFFER: usize = 8;

const TIMEOUT_MESSAGE: &str = "Upstream did not respond in time";

pub async fn ask_ai(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| {
        debug!("Rejected request body: {}", e);
        ApiError::Validation
    })?;

    let token = caller_token(&headers);
    generate(&state, request, token, || {
        client_identity(&headers, peer.map(|ConnectInfo(addr)| addr))
    })
    .await
}

/// Run one generation request.
///
/// `identity` is only evaluated when the request counts against the
/// anonymous quota.
pub async fn generate<F>(
    state: &AppState,
    request: GenerationRequest,
    caller_token: Option<String>,
    identity: F,
) -> Result<Response, ApiError>
where
    F: FnOnce() -> String,
{
    let prompt = request
        .prompt
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(ApiError::Validation)?;
    let generation = Generation {
        prompt,
        previous_prompt: request.previous_prompt.as_deref().filter(|p| !p.is_empty()),
        html: request.html.as_deref().filter(|h| !h.is_empty()),
    };

    let request_id = Uuid::new_v4();
    let credential = Credential::resolve(
        state.config.hf_token.as_deref(),
        caller_token.as_deref(),
        state.config.default_hf_token.as_deref(),
    );

    if credential.requires_quota() {
        let identity = identity();
        let admission = state.quota.admit(&identity);
        if !admission.allowed {
            warn!(
                %request_id,
                identity = %identity,
                count = admission.current_count,
                "Anonymous quota exceeded"
            );
            return Err(ApiError::QuotaExceeded);
        }
        debug!(%request_id, identity = %identity, count = admission.current_count, "Anonymous request admitted");
    }

    // An absent provider is not `auto`: it is budgeted against the default.
    let provider_key = request.provider.as_deref().unwrap_or_default();
    let profile = state.registry.lookup(provider_key);
    let estimate = budget::estimate(generation.prompt, generation.previous_prompt, generation.html);
    if !budget::check_budget(estimate, profile, ProviderRegistry::is_explicit(provider_key)) {
        info!(
            %request_id,
            provider = %profile.id,
            estimate,
            max_tokens = profile.max_tokens,
            "Request exceeds provider budget"
        );
        return Err(ApiError::BudgetExceeded {
            provider: profile.name.clone(),
            max_tokens: profile.max_tokens,
        });
    }

    info!(
        %request_id,
        provider = %profile.id,
        estimate,
        iterating = generation.html.is_some(),
        "Starting generation"
    );

    let deadline = state.config.stream_timeout.map(|t| Instant::now() + t);
    let opened = within(
        deadline,
        driver::open(
            state.llm.as_ref(),
            &state.config.model_id,
            profile,
            &generation,
            credential.into_token(),
        ),
    )
    .await
    .map_err(|e| {
        warn!(%request_id, "Upstream did not open the stream before the deadline");
        e
    })?;
    let mut session = opened.map_err(|e| {
        warn!(%request_id, kind = ?e.kind, status = ?e.status, "Upstream rejected request: {}", e);
        ApiError::from(e)
    })?;

    let primed = within(deadline, session.prime()).await?;
    let first = primed.map_err(|e| {
        warn!(%request_id, kind = ?e.kind, "Upstream failed before streaming: {}", e);
        ApiError::from(e)
    })?;

    Ok(stream_response(session, first, deadline))
}

/// Await `fut`, giving up at `deadline` if one is set.
async fn within<T>(deadline: Option<Instant>, fut: impl Future<Output = T>) -> Result<T, ApiError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| ApiError::Upstream(TIMEOUT_MESSAGE.to_string())),
        None => Ok(fut.await),
    }
}

/// Hand the session to a relay task and wrap its output as the response body.
fn stream_response(
    session: StreamSession,
    first: Option<Ingested>,
    deadline: Option<Instant>,
) -> Response {
    let (tx, mut rx) = mpsc::channel::<Bytes>(RELAY_BUFFER);
    tokio::spawn(session.relay(first, tx, deadline));

    let body = Body::from_stream(async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<_, Infallible>(chunk);
        }
    });

    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}
