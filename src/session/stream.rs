//! Stream session controller: the single in-flight generation request.
//!
//! One [`StreamHandle`] exists at a time; beginning a new stream cancels
//! any predecessor (last-writer-wins). Chunks come back to the session
//! loop tagged with the handle's id, so anything a cancelled task emits
//! afterwards is identifiable as stale and never mutates a message.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{ChatBackend, ChatRequest};
use crate::conversation::ConversationLog;
use crate::error::Result;

/// Terminal status of a stream, as observed by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Completed,
    Cancelled,
    Errored,
}

/// Events sent from the stream task back to the session loop.
#[derive(Debug)]
pub enum StreamEvent {
    /// One decoded text chunk for the stream with this id.
    Chunk { stream: u64, text: String },
    /// The stream ended: `Ok` for natural completion, `Err` for a
    /// transport failure. Cancelled streams send nothing.
    Closed { stream: u64, result: Result<()> },
}

/// How a finished stream resolved.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Natural completion; `final_text` is the full accumulated reply.
    Completed { message: Uuid, final_text: String },
    /// Transport failure. `surfaced` is true when the error text replaced
    /// an empty message; partial content is never overwritten.
    Errored { message: Uuid, surfaced: bool },
}

/// How a cancellation resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No content had arrived; the placeholder was removed from the log.
    Discarded { message: Uuid },
    /// Partial content stays in the log as a truncated assistant turn.
    KeptPartial { message: Uuid },
}

/// The one live stream: cancellation token, target message, and an
/// accumulator mirroring the message content.
struct StreamHandle {
    id: u64,
    message: Uuid,
    cancel: CancellationToken,
    accumulator: String,
}

/// Owns the single in-flight generation request.
pub struct StreamController {
    backend: Arc<dyn ChatBackend>,
    model: String,
    events: mpsc::UnboundedSender<StreamEvent>,
    active: Option<StreamHandle>,
    next_id: u64,
}

impl StreamController {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        model: String,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            backend,
            model,
            events,
            active: None,
            next_id: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Message id the active stream is writing into, if any.
    pub fn active_message(&self) -> Option<Uuid> {
        self.active.as_ref().map(|h| h.message)
    }

    /// Start streaming a reply to `utterance`.
    ///
    /// Cancels any prior stream first, appends the user message and an
    /// empty assistant placeholder to the log, and spawns the request
    /// task. The request payload is built from the non-blank messages
    /// only, so the placeholder is excluded from its own request.
    ///
    /// Returns the placeholder's message id and the supersession outcome
    /// for the prior stream, if one was active.
    pub fn begin(
        &mut self,
        log: &mut ConversationLog,
        utterance: &str,
    ) -> (Uuid, Option<CancelOutcome>) {
        let superseded = self.cancel(log);

        log.push_user(utterance);
        let message = log.push_assistant_placeholder();
        let request = ChatRequest::from_log(&self.model, log);

        self.next_id += 1;
        let id = self.next_id;
        let cancel = CancellationToken::new();

        info!("opening stream {id} ({} context messages)", request.messages.len());
        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run_stream(backend, request, id, task_cancel, events).await;
        });

        self.active = Some(StreamHandle {
            id,
            message,
            cancel,
            accumulator: String::new(),
        });
        (message, superseded)
    }

    /// Apply one chunk to the growing message.
    ///
    /// Ownership check: chunks for anything but the active handle's id
    /// are stale and ignored. Returns the message id to re-render.
    pub fn apply_chunk(&mut self, log: &mut ConversationLog, stream: u64, text: &str) -> Option<Uuid> {
        let handle = self.active.as_mut()?;
        if handle.id != stream {
            debug!("dropping stale chunk for stream {stream}");
            return None;
        }
        handle.accumulator.push_str(text);
        log.append_content(handle.message, text);
        Some(handle.message)
    }

    /// Resolve the active stream's terminal event.
    ///
    /// On a transport failure the error becomes the message content only
    /// when nothing real arrived; partial content is kept untouched.
    /// Returns `None` for stale closures.
    pub fn finish(
        &mut self,
        log: &mut ConversationLog,
        stream: u64,
        result: Result<()>,
    ) -> Option<StreamOutcome> {
        if self.active.as_ref().map(|h| h.id) != Some(stream) {
            debug!("dropping stale closure for stream {stream}");
            return None;
        }
        let handle = self.active.take()?;

        match result {
            Ok(()) => Some(StreamOutcome::Completed {
                message: handle.message,
                final_text: handle.accumulator,
            }),
            Err(e) => {
                warn!("stream {stream} failed: {e}");
                let surfaced = handle.accumulator.is_empty();
                if surfaced {
                    log.set_content(handle.message, format!("Error: {e}"));
                }
                Some(StreamOutcome::Errored {
                    message: handle.message,
                    surfaced,
                })
            }
        }
    }

    /// Cancel the active stream, if any.
    ///
    /// An empty placeholder is discarded; partial content stays as a
    /// truncated assistant turn. Either way the handle is invalidated
    /// immediately, so late task events are ignored.
    pub fn cancel(&mut self, log: &mut ConversationLog) -> Option<CancelOutcome> {
        let handle = self.active.take()?;
        handle.cancel.cancel();
        info!("cancelled stream {}", handle.id);
        if handle.accumulator.is_empty() {
            log.remove_if_empty(handle.message);
            Some(CancelOutcome::Discarded {
                message: handle.message,
            })
        } else {
            Some(CancelOutcome::KeptPartial {
                message: handle.message,
            })
        }
    }
}

/// The request task: forwards chunks until the stream ends or the token
/// fires. A cancelled task exits without an event; the controller has
/// already invalidated its handle.
async fn run_stream(
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
    id: u64,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<StreamEvent>,
) {
    use futures_util::StreamExt;

    let open = tokio::select! {
        // Don't issue the request at all if cancellation already won.
        biased;
        _ = cancel.cancelled() => return,
        open = backend.stream_chat(&request) => open,
    };
    let mut stream = match open {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(StreamEvent::Closed {
                stream: id,
                result: Err(e),
            });
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = stream.next() => match chunk {
                Some(Ok(text)) => {
                    let _ = events.send(StreamEvent::Chunk { stream: id, text });
                }
                Some(Err(e)) => {
                    let _ = events.send(StreamEvent::Closed {
                        stream: id,
                        result: Err(e),
                    });
                    return;
                }
                None => {
                    let _ = events.send(StreamEvent::Closed {
                        stream: id,
                        result: Ok(()),
                    });
                    return;
                }
            }
        }
    }
}
