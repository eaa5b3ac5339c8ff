//! Typed upstream errors.
//!
//! Callers branch on [`LlmErrorKind`] instead of inspecting upstream wording.
//! Wording is only inspected here, when an upstream reply is first turned into
//! an [`LlmError`].

use thiserror::Error;

/// Upstream messages that mean the account ran out of paid credits.
const BILLING_EXHAUSTED_MARKERS: &[&str] = &["exceeded your monthly included credits"];

/// Broad category of an upstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Billing or credit quota exhausted; the caller has to upgrade.
    Quota,
    /// Rate limited, overloaded or unreachable; may succeed later.
    Transient,
    /// Credential rejected.
    Auth,
    /// Anything else.
    Other,
}

/// Error reported by an upstream inference provider.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    /// HTTP status of the upstream reply, when there was one.
    pub status: Option<u16>,
    /// Upstream error text, unmodified.
    pub message: String,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Classify an error reply from the upstream.
    pub fn from_upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = if is_billing_exhausted(&message) {
            LlmErrorKind::Quota
        } else {
            status.map(classify_http_status).unwrap_or(LlmErrorKind::Other)
        };
        Self {
            kind,
            status,
            message,
        }
    }

    /// Connection-level failure (DNS, TLS, reset).
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Transient, message)
    }

    pub fn is_quota(&self) -> bool {
        self.kind == LlmErrorKind::Quota
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        402 => LlmErrorKind::Quota,
        401 | 403 => LlmErrorKind::Auth,
        408 | 429 | 500..=599 => LlmErrorKind::Transient,
        _ => LlmErrorKind::Other,
    }
}

fn is_billing_exhausted(message: &str) -> bool {
    BILLING_EXHAUSTED_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}
