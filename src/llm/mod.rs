//! LLM client module for streaming chat completions.
//!
//! This module provides a trait-based abstraction over upstream inference
//! providers, with the Hugging Face inference router as the primary
//! implementation.

mod error;
mod huggingface;
#[cfg(test)]
pub(crate) mod scripted;

pub use error::{classify_http_status, LlmError, LlmErrorKind};
pub use huggingface::HuggingFaceClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Bearer token for the upstream. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken(<redacted>)")
    }
}

/// A streaming chat completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    /// Upstream provider the router should dispatch to.
    pub provider: String,
    pub messages: Vec<ChatMessage>,
    /// Token ceiling; `None` when the provider rejects the parameter.
    pub max_tokens: Option<usize>,
    pub token: Option<ApiToken>,
}

/// Incremental text fragments from an open completion stream.
///
/// The channel closes when the upstream ends the stream. An `Err` item is
/// terminal: nothing follows it.
pub type FragmentReceiver = mpsc::Receiver<Result<String, LlmError>>;

/// Trait for streaming inference providers.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Open a streaming chat completion.
    ///
    /// Returns `Err` when the upstream rejects the call before streaming
    /// (bad credential, exhausted credits, capacity). Once `cancel` fires the
    /// implementation must stop reading from the upstream and release the
    /// connection.
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<FragmentReceiver, LlmError>;
}
