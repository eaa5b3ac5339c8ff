//! In-memory provider that replays a fixed script. Test-only.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{CompletionRequest, FragmentReceiver, InferenceProvider, LlmError};

pub(crate) struct ScriptedProvider {
    open_error: Option<LlmError>,
    events: Vec<Result<String, LlmError>>,
    /// Keep the stream open after the script until cancelled.
    hold_open: bool,
    /// Never resolve `stream_chat`, like an upstream that sends no headers.
    stall_open: bool,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
    last_cancel: Mutex<Option<CancellationToken>>,
}

impl ScriptedProvider {
    pub(crate) fn fragments(fragments: &[&str]) -> Self {
        Self::events(fragments.iter().map(|f| Ok(f.to_string())).collect())
    }

    pub(crate) fn events(events: Vec<Result<String, LlmError>>) -> Self {
        Self {
            open_error: None,
            events,
            hold_open: false,
            stall_open: false,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            last_cancel: Mutex::new(None),
        }
    }

    pub(crate) fn rejecting(error: LlmError) -> Self {
        let mut provider = Self::events(Vec::new());
        provider.open_error = Some(error);
        provider
    }

    pub(crate) fn stalled() -> Self {
        let mut provider = Self::events(Vec::new());
        provider.stall_open = true;
        provider
    }

    pub(crate) fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }

    /// Whether the stream handed to the last caller has been cancelled.
    pub(crate) fn was_cancelled(&self) -> bool {
        self.last_cancel
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn stream_chat(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> Result<FragmentReceiver, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
        *self.last_cancel.lock().unwrap() = Some(cancel.clone());

        if self.stall_open {
            std::future::pending::<()>().await;
        }
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let (tx, rx) = mpsc::channel(1);
        let events = self.events.clone();
        let hold_open = self.hold_open;
        tokio::spawn(async move {
            for event in events {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            if hold_open {
                cancel.cancelled().await;
            }
        });
        Ok(rx)
    }
}
