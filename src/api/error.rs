//! Caller-facing error outcomes and their HTTP rendering.
//!
//! Every variant is a pre-stream outcome: once the first byte of a document
//! has been sent, failures end the stream instead of producing one of these.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::llm::LlmError;

const GENERIC_FAILURE: &str = "An error occurred while processing your request.";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Required field missing from the request.
    #[error("Missing required fields")]
    Validation,

    /// Anonymous allowance used up; the caller should log in.
    #[error("Log In to continue using the service")]
    QuotaExceeded,

    /// Request too large for the explicitly selected provider.
    #[error("Context is too long. {provider} allow {max_tokens} max tokens.")]
    BudgetExceeded { provider: String, max_tokens: usize },

    /// Upstream credits exhausted; the caller should upgrade.
    #[error("{0}")]
    BillingExhausted(String),

    /// Any other upstream failure before streaming began.
    #[error("{0}")]
    Upstream(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation | Self::BudgetExceeded { .. } => StatusCode::BAD_REQUEST,
            Self::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::BillingExhausted(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON envelope, including the flag that tells the client which dialog to open.
    pub fn body(&self) -> Value {
        let message = self.to_string();
        match self {
            Self::QuotaExceeded => json!({ "ok": false, "openLogin": true, "message": message }),
            Self::BudgetExceeded { .. } => {
                json!({ "ok": false, "openSelectProvider": true, "message": message })
            }
            Self::BillingExhausted(_) => {
                json!({ "ok": false, "openProModal": true, "message": message })
            }
            Self::Validation | Self::Upstream(_) => json!({ "ok": false, "message": message }),
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        if err.is_quota() {
            return Self::BillingExhausted(err.message);
        }
        if err.message.trim().is_empty() {
            return Self::Upstream(GENERIC_FAILURE.to_string());
        }
        Self::Upstream(err.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
