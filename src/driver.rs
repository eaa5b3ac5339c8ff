//! Completion stream driver.
//!
//! Owns one upstream completion stream for the lifetime of a request and
//! relays it to the caller:
//!
//! - **Opening**: build the message sequence and open the upstream call.
//!   A synchronous rejection never reaches the caller's byte stream.
//! - **Priming**: wait for the first forwardable text so the HTTP status is
//!   only committed once there is something to send.
//! - **Streaming**: forward each fragment as it arrives and stop as soon as
//!   the accumulated output contains the closing `</html>` marker.
//! - **Completing / Failed**: cancel the upstream and close the output.
//!
//! Once a byte has been sent the protocol has no way to report an error, so
//! later failures end the stream without a payload.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::llm::{
    ApiToken, ChatMessage, CompletionRequest, FragmentReceiver, InferenceProvider, LlmError,
};
use crate::providers::ProviderProfile;

/// Literal that marks the generated document as complete.
pub const CLOSING_MARKER: &str = "</html>";

pub const SYSTEM_PROMPT: &str = "ONLY USE HTML, CSS AND JAVASCRIPT. If you want to use ICON make sure to import the library first. Try to create the best UI possible by using only HTML, CSS and JAVASCRIPT. Use as much as you can TailwindCSS for the CSS, if you can't do something with TailwindCSS, then use custom CSS (make sure to import <script src=\"https://cdn.tailwindcss.com\"></script> in the head). Also, try to ellaborate as much as you can, to create something unique. ALWAYS GIVE THE RESPONSE INTO A SINGLE HTML FILE";

/// What the caller asked for, as sent upstream.
#[derive(Debug, Clone, Copy)]
pub struct Generation<'a> {
    pub prompt: &'a str,
    pub previous_prompt: Option<&'a str>,
    pub html: Option<&'a str>,
}

/// Build the outbound conversation.
///
/// System instruction, then the previous user turn and the current document
/// when iterating on earlier output, then the new instruction.
pub fn build_messages(generation: &Generation<'_>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];
    if let Some(previous) = generation.previous_prompt {
        messages.push(ChatMessage::user(previous));
    }
    if let Some(html) = generation.html {
        messages.push(ChatMessage::assistant(format!(
            "The current code is: {}.",
            html
        )));
    }
    messages.push(ChatMessage::user(generation.prompt));
    messages
}

/// Result of feeding one fragment through the termination heuristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    /// Text to send to the caller.
    pub forward: String,
    /// The closing marker has been seen; nothing more will be read.
    pub complete: bool,
}

/// How a relay ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// Closing marker seen.
    Completed,
    /// Upstream closed without a closing marker.
    UpstreamEnded,
    /// Upstream failed after streaming began.
    UpstreamFailed(LlmError),
    /// Caller went away.
    CallerGone,
    /// Overall deadline hit.
    TimedOut,
}

impl StreamOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Completed | Self::UpstreamEnded)
    }
}

/// Per-request stream state.
///
/// Dropping the session cancels the upstream.
pub struct StreamSession {
    upstream: FragmentReceiver,
    cancel: CancellationToken,
    buffer: String,
    sent_bytes: usize,
    trailing_noise: bool,
    complete: bool,
}

/// Open the upstream stream for one generation.
pub async fn open(
    provider: &dyn InferenceProvider,
    model: &str,
    profile: &ProviderProfile,
    generation: &Generation<'_>,
    token: Option<ApiToken>,
) -> Result<StreamSession, LlmError> {
    let request = CompletionRequest {
        model: model.to_string(),
        provider: profile.id.clone(),
        messages: build_messages(generation),
        max_tokens: profile.accepts_max_tokens.then_some(profile.max_tokens),
        token,
    };

    let cancel = CancellationToken::new();
    let upstream = provider.stream_chat(request, cancel.clone()).await?;
    Ok(StreamSession::new(upstream, cancel, profile.trailing_noise))
}

impl StreamSession {
    pub fn new(upstream: FragmentReceiver, cancel: CancellationToken, trailing_noise: bool) -> Self {
        Self {
            upstream,
            cancel,
            buffer: String::new(),
            sent_bytes: 0,
            trailing_noise,
            complete: false,
        }
    }

    /// Accumulated output so far.
    pub fn output(&self) -> &str {
        &self.buffer
    }

    /// Append one upstream fragment and decide what to forward.
    ///
    /// Providers with trailing noise have the fragment cut right after the
    /// closing marker; for the others the fragment is forwarded whole.
    pub fn ingest(&mut self, fragment: &str) -> Ingested {
        let start = self.buffer.len();
        self.buffer.push_str(fragment);

        // The marker can straddle the previous fragment.
        let mut from = start.saturating_sub(CLOSING_MARKER.len() - 1);
        while !self.buffer.is_char_boundary(from) {
            from -= 1;
        }

        let Some(pos) = self.buffer[from..].find(CLOSING_MARKER).map(|p| p + from) else {
            return Ingested {
                forward: fragment.to_string(),
                complete: false,
            };
        };

        self.complete = true;
        if !self.trailing_noise {
            return Ingested {
                forward: fragment.to_string(),
                complete: true,
            };
        }

        let end = pos + CLOSING_MARKER.len();
        self.buffer.truncate(end);
        Ingested {
            forward: self.buffer[start..].to_string(),
            complete: true,
        }
    }

    /// Next piece of output, or `None` when there is nothing left to read.
    ///
    /// Cancel-safe: a dropped call loses no upstream data.
    pub async fn next_output(&mut self) -> Option<Result<Ingested, LlmError>> {
        loop {
            if self.complete {
                return None;
            }
            match self.upstream.recv().await? {
                Err(e) => return Some(Err(e)),
                Ok(fragment) if fragment.is_empty() => continue,
                Ok(fragment) => {
                    let ingested = self.ingest(&fragment);
                    if ingested.forward.is_empty() && !ingested.complete {
                        continue;
                    }
                    return Some(Ok(ingested));
                }
            }
        }
    }

    /// Wait for the first output before anything is committed to the caller.
    ///
    /// `Ok(None)` means the upstream closed without producing text.
    pub async fn prime(&mut self) -> Result<Option<Ingested>, LlmError> {
        self.next_output().await.transpose()
    }

    /// Relay the stream into `out` until it completes, fails, the caller
    /// disconnects or `deadline` passes. The upstream is always cancelled
    /// before returning.
    pub async fn relay(
        mut self,
        first: Option<Ingested>,
        out: mpsc::Sender<Bytes>,
        deadline: Option<Instant>,
    ) -> StreamOutcome {
        let outcome = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.pump(first, &out))
                .await
                .unwrap_or(StreamOutcome::TimedOut),
            None => self.pump(first, &out).await,
        };
        self.cancel.cancel();

        match &outcome {
            StreamOutcome::UpstreamFailed(e) => warn!(
                sent_bytes = self.sent_bytes,
                kind = ?e.kind,
                "Upstream failed mid-stream, closing response: {}", e
            ),
            StreamOutcome::TimedOut => {
                warn!(sent_bytes = self.sent_bytes, "Stream deadline reached, closing response")
            }
            StreamOutcome::CallerGone => {
                info!(sent_bytes = self.sent_bytes, "Caller disconnected, upstream abandoned")
            }
            other => debug!(sent_bytes = self.sent_bytes, outcome = ?other, "Stream finished"),
        }
        outcome
    }

    async fn pump(&mut self, first: Option<Ingested>, out: &mpsc::Sender<Bytes>) -> StreamOutcome {
        if let Some(chunk) = first {
            if let Some(outcome) = self.forward(chunk, out).await {
                return outcome;
            }
        }

        loop {
            let next = tokio::select! {
                _ = out.closed() => return StreamOutcome::CallerGone,
                next = self.next_output() => next,
            };

            match next {
                None if self.complete => return StreamOutcome::Completed,
                None => return StreamOutcome::UpstreamEnded,
                Some(Err(e)) => return StreamOutcome::UpstreamFailed(e),
                Some(Ok(chunk)) => {
                    if let Some(outcome) = self.forward(chunk, out).await {
                        return outcome;
                    }
                }
            }
        }
    }

    async fn forward(&mut self, chunk: Ingested, out: &mpsc::Sender<Bytes>) -> Option<StreamOutcome> {
        if !chunk.forward.is_empty() {
            let len = chunk.forward.len();
            if out.send(Bytes::from(chunk.forward)).await.is_err() {
                return Some(StreamOutcome::CallerGone);
            }
            self.sent_bytes += len;
        }
        if chunk.complete {
            // Abandon the rest of the upstream stream right away.
            self.cancel.cancel();
            return Some(StreamOutcome::Completed);
        }
        None
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedProvider;
    use crate::llm::{LlmErrorKind, Role};
    use crate::providers::ProviderRegistry;
    use std::time::Duration;

    const BILLING: &str = "You have exceeded your monthly included credits for Inference Providers.";

    fn generation(prompt: &str) -> Generation<'_> {
        Generation {
            prompt,
            previous_prompt: None,
            html: None,
        }
    }

    async fn run(
        provider: &ScriptedProvider,
        key: &str,
    ) -> (Result<Option<Ingested>, LlmError>, Vec<String>, Option<StreamOutcome>) {
        let registry = ProviderRegistry::new();
        let profile = registry.lookup(key);
        let mut session = open(provider, "model", profile, &generation("page"), None)
            .await
            .unwrap();

        let primed = session.prime().await;
        if primed.is_err() {
            return (primed, Vec::new(), None);
        }
        let first = primed.as_ref().ok().cloned().flatten();

        let (tx, mut rx) = mpsc::channel(8);
        let outcome = session.relay(first, tx, None).await;
        let mut forwarded = Vec::new();
        while let Some(chunk) = rx.recv().await {
            forwarded.push(String::from_utf8(chunk.to_vec()).unwrap());
        }
        (primed, forwarded, Some(outcome))
    }

    #[test]
    fn test_build_messages_fresh() {
        let messages = build_messages(&generation("a landing page"));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
        assert_eq!(messages[1], ChatMessage::user("a landing page"));
    }

    #[test]
    fn test_build_messages_iteration() {
        let messages = build_messages(&Generation {
            prompt: "make it blue",
            previous_prompt: Some("a landing page"),
            html: Some("<html></html>"),
        });
        assert_eq!(
            messages[1..],
            [
                ChatMessage::user("a landing page"),
                ChatMessage::assistant("The current code is: <html></html>."),
                ChatMessage::user("make it blue"),
            ]
        );
    }

    #[test]
    fn test_ingest_plain_provider_forwards_whole_fragment() {
        let (_tx, rx) = mpsc::channel(1);
        let mut session = StreamSession::new(rx, CancellationToken::new(), false);
        assert_eq!(
            session.ingest("<html>"),
            Ingested { forward: "<html>".to_string(), complete: false }
        );
        assert_eq!(
            session.ingest("</html>\n"),
            Ingested { forward: "</html>\n".to_string(), complete: true }
        );
    }

    #[test]
    fn test_ingest_truncates_trailing_noise() {
        let (_tx, rx) = mpsc::channel(1);
        let mut session = StreamSession::new(rx, CancellationToken::new(), true);
        session.ingest("<html>body");
        let out = session.ingest("</html>TRAILING</html>");
        assert_eq!(out, Ingested { forward: "</html>".to_string(), complete: true });
        assert_eq!(session.output(), "<html>body</html>");
    }

    #[test]
    fn test_ingest_marker_split_across_fragments() {
        let (_tx, rx) = mpsc::channel(1);
        let mut session = StreamSession::new(rx, CancellationToken::new(), true);
        assert!(!session.ingest("<p>é</p></ht").complete);
        let out = session.ingest("ml> noise");
        assert_eq!(out, Ingested { forward: "ml>".to_string(), complete: true });
        assert_eq!(session.output(), "<p>é</p></html>");
    }

    #[tokio::test]
    async fn test_trailing_noise_never_forwarded() {
        let provider = ScriptedProvider::fragments(&["<html>", "body", "</html>TRAILING", "more"]);
        let (_, forwarded, outcome) = run(&provider, "sambanova").await;

        assert_eq!(forwarded, vec!["<html>", "body", "</html>"]);
        assert!(matches!(outcome, Some(StreamOutcome::Completed)));
        assert!(provider.was_cancelled());
    }

    #[tokio::test]
    async fn test_stops_reading_after_marker() {
        let provider = ScriptedProvider::fragments(&["<html></html>", "ignored"]).held_open();
        let (_, forwarded, outcome) = run(&provider, "novita").await;

        assert_eq!(forwarded, vec!["<html></html>"]);
        assert!(matches!(outcome, Some(StreamOutcome::Completed)));
        assert!(provider.was_cancelled());
    }

    #[tokio::test]
    async fn test_end_without_marker_keeps_partial_output() {
        let provider = ScriptedProvider::fragments(&["<html>", "", "<body>half"]);
        let (_, forwarded, outcome) = run(&provider, "novita").await;

        assert_eq!(forwarded, vec!["<html>", "<body>half"]);
        assert!(matches!(outcome, Some(StreamOutcome::UpstreamEnded)));
        assert!(outcome.unwrap().is_clean());
    }

    #[tokio::test]
    async fn test_error_before_output_surfaces_from_prime() {
        let provider = ScriptedProvider::events(vec![
            Ok(String::new()),
            Err(LlmError::from_upstream(None, BILLING)),
        ]);
        let (primed, forwarded, outcome) = run(&provider, "novita").await;

        let err = primed.unwrap_err();
        assert!(err.is_quota());
        assert_eq!(err.message, BILLING);
        assert!(forwarded.is_empty());
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_error_after_output_closes_silently() {
        let provider = ScriptedProvider::events(vec![
            Ok("<html>".to_string()),
            Err(LlmError::from_upstream(None, BILLING)),
        ]);
        let (_, forwarded, outcome) = run(&provider, "novita").await;

        assert_eq!(forwarded, vec!["<html>"]);
        match outcome {
            Some(StreamOutcome::UpstreamFailed(e)) => assert_eq!(e.kind, LlmErrorKind::Quota),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_stream_primes_to_none() {
        let provider = ScriptedProvider::fragments(&[]);
        let (primed, forwarded, outcome) = run(&provider, "novita").await;
        assert!(primed.unwrap().is_none());
        assert!(forwarded.is_empty());
        assert!(matches!(outcome, Some(StreamOutcome::UpstreamEnded)));
    }

    #[tokio::test]
    async fn test_open_rejection() {
        let provider = ScriptedProvider::rejecting(LlmError::from_upstream(Some(401), "Invalid token"));
        let registry = ProviderRegistry::new();
        let result = open(&provider, "model", registry.default_profile(), &generation("p"), None).await;
        assert_eq!(result.err().unwrap().kind, LlmErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_open_sends_provider_and_ceiling() {
        let provider = ScriptedProvider::fragments(&[]);
        let registry = ProviderRegistry::new();

        open(&provider, "model", registry.lookup("together"), &generation("p"), Some(ApiToken::new("t")))
            .await
            .unwrap();
        let request = provider.last_request().unwrap();
        assert_eq!(request.provider, "together");
        assert_eq!(request.max_tokens, Some(128_000));
        assert_eq!(request.token, Some(ApiToken::new("t")));

        open(&provider, "model", registry.lookup("sambanova"), &generation("p"), None)
            .await
            .unwrap();
        assert_eq!(provider.last_request().unwrap().max_tokens, None);
    }

    #[tokio::test]
    async fn test_caller_disconnect_cancels_upstream() {
        let provider = ScriptedProvider::fragments(&["<html>"]).held_open();
        let registry = ProviderRegistry::new();
        let mut session = open(&provider, "model", registry.default_profile(), &generation("p"), None)
            .await
            .unwrap();
        let first = session.prime().await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let outcome = session.relay(first, tx, None).await;

        assert!(matches!(outcome, StreamOutcome::CallerGone));
        assert!(provider.was_cancelled());
    }

    #[tokio::test]
    async fn test_deadline_closes_stream() {
        let provider = ScriptedProvider::fragments(&["<html>"]).held_open();
        let registry = ProviderRegistry::new();
        let mut session = open(&provider, "model", registry.default_profile(), &generation("p"), None)
            .await
            .unwrap();
        let first = session.prime().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let deadline = Instant::now() + Duration::from_millis(50);
        let outcome = session.relay(first, tx, Some(deadline)).await;

        assert!(matches!(outcome, StreamOutcome::TimedOut));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from("<html>"));
        assert!(rx.recv().await.is_none());
        assert!(provider.was_cancelled());
    }

    #[tokio::test]
    async fn test_drop_cancels_upstream() {
        let provider = ScriptedProvider::fragments(&[]).held_open();
        let registry = ProviderRegistry::new();
        let session = open(&provider, "model", registry.default_profile(), &generation("p"), None)
            .await
            .unwrap();
        assert!(!provider.was_cancelled());
        drop(session);
        assert!(provider.was_cancelled());
    }
}
