//! Hugging Face inference router client.
//!
//! Speaks the OpenAI-compatible chat completion protocol exposed by the
//! router: the provider is selected with a `model:provider` suffix and the
//! reply is a server-sent event stream of `chat.completion.chunk` objects
//! terminated by `[DONE]`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{retry, Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    ChatMessage, CompletionRequest, FragmentReceiver, InferenceProvider, LlmError, LlmErrorKind,
};

/// Fragments buffered between the upstream reader and the relay.
const FRAGMENT_BUFFER: usize = 32;

const DONE_SENTINEL: &str = "[DONE]";

/// Streaming client for `{base_url}/v1/chat/completions`.
pub struct HuggingFaceClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: String,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

impl HuggingFaceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn build_request(&self, request: &CompletionRequest) -> reqwest::RequestBuilder {
        let body = ChatCompletionBody {
            model: format!("{}:{}", request.model, request.provider),
            messages: &request.messages,
            stream: true,
            max_tokens: request.max_tokens,
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(token) = &request.token {
            builder = builder.bearer_auth(token.expose());
        }
        builder
    }
}

#[async_trait]
impl InferenceProvider for HuggingFaceClient {
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<FragmentReceiver, LlmError> {
        let builder = self.build_request(&request);
        let mut source = EventSource::new(builder)
            .map_err(|e| LlmError::new(LlmErrorKind::Other, e.to_string()))?;
        source.set_retry_policy(Box::new(retry::Never));

        debug!(
            model = %request.model,
            provider = %request.provider,
            messages = request.messages.len(),
            "Opening upstream completion stream"
        );

        // Wait for the upstream to accept the call so rejections surface here.
        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                source.close();
                return Err(LlmError::new(LlmErrorKind::Other, "request cancelled"));
            }
            event = source.next() => event,
        };

        let mut pending = None;
        match opened {
            Some(Ok(Event::Open)) => {}
            Some(Ok(Event::Message(message))) => pending = Some(message.data),
            Some(Err(e)) => {
                source.close();
                return Err(error_from_source(e).await);
            }
            None => {}
        }

        let (tx, rx) = mpsc::channel(FRAGMENT_BUFFER);
        tokio::spawn(async move {
            if let Some(data) = pending {
                if !forward_message(&data, &tx).await {
                    source.close();
                    return;
                }
            }

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Upstream stream abandoned");
                        break;
                    }
                    _ = tx.closed() => {
                        debug!("Fragment receiver dropped");
                        break;
                    }
                    event = source.next() => event,
                };

                match event {
                    None => break,
                    Some(Ok(Event::Open)) => continue,
                    Some(Ok(Event::Message(message))) => {
                        if !forward_message(&message.data, &tx).await {
                            break;
                        }
                    }
                    Some(Err(reqwest_eventsource::Error::StreamEnded)) => break,
                    Some(Err(e)) => {
                        let err = error_from_source(e).await;
                        warn!(kind = ?err.kind, "Upstream stream failed: {}", err);
                        let _ = tx.send(Err(err)).await;
                        break;
                    }
                }
            }

            source.close();
        });

        Ok(rx)
    }
}

/// Push one SSE payload to the relay. Returns `false` when reading should stop.
async fn forward_message(data: &str, tx: &mpsc::Sender<Result<String, LlmError>>) -> bool {
    match parse_chunk(data) {
        Ok(ChunkPayload::Done) => false,
        Ok(ChunkPayload::Content(Some(fragment))) => tx.send(Ok(fragment)).await.is_ok(),
        Ok(ChunkPayload::Content(None)) => true,
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            false
        }
    }
}

#[derive(Debug, PartialEq)]
enum ChunkPayload {
    Done,
    Content(Option<String>),
}

/// Decode one SSE `data` payload.
fn parse_chunk(data: &str) -> Result<ChunkPayload, LlmError> {
    let data = data.trim();
    if data == DONE_SENTINEL {
        return Ok(ChunkPayload::Done);
    }

    let value: Value = serde_json::from_str(data).map_err(|e| {
        LlmError::new(
            LlmErrorKind::Other,
            format!("Invalid stream chunk from upstream: {}", e),
        )
    })?;

    if value.get("error").is_some() {
        return Err(LlmError::from_upstream(None, extract_error_message(&value)));
    }

    let chunk: StreamChunk = serde_json::from_value(value).map_err(|e| {
        LlmError::new(
            LlmErrorKind::Other,
            format!("Invalid stream chunk from upstream: {}", e),
        )
    })?;

    Ok(ChunkPayload::Content(
        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta)
            .and_then(|d| d.content)
            .filter(|c| !c.is_empty()),
    ))
}

/// Pull a human-readable message out of an upstream error body.
fn extract_error_message(value: &Value) -> String {
    let from_error = match value.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(obj @ Value::Object(_)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    from_error
        .or_else(|| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| value.to_string())
}

fn message_from_body(status: reqwest::StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("Upstream returned HTTP {}", status.as_u16()));
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) => extract_error_message(&value),
        Err(_) => body.to_string(),
    }
}

async fn error_from_source(err: reqwest_eventsource::Error) -> LlmError {
    use reqwest_eventsource::Error;

    match err {
        Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            LlmError::from_upstream(Some(status.as_u16()), message_from_body(status, &body))
        }
        Error::InvalidContentType(_, response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            LlmError::from_upstream(Some(status.as_u16()), message_from_body(status, &body))
        }
        Error::Transport(e) => LlmError::transport(e.to_string()),
        other => LlmError::new(LlmErrorKind::Other, other.to_string()),
    }
}
