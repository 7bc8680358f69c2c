//! The chat session: one event loop that owns all mutable state.
//!
//! Every flag the callbacks consult ("is a generation in flight", "should
//! auto-listen") lives on [`ChatSession`], and every mutation happens on
//! the loop task — single-loop ownership is the mutual-exclusion
//! mechanism, not locks. The loop arbitrates between three
//! independently-paced sources: the network token stream, microphone
//! capture, and speech playback. Per kind, at most one handle is alive;
//! starting a new one supersedes the old (last-writer-wins).

pub mod stream;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audio::AudioSink;
use crate::backend::ChatBackend;
use crate::capture::{CaptureAction, CaptureEvent, CaptureMachine, CaptureState, Recognizer};
use crate::config::ClientConfig;
use crate::conversation::{ConversationLog, Message};
use crate::error::{ClientError, Result};
use crate::playback::{PlaybackController, PlaybackEvent};
use crate::render::{Block, render};

pub use stream::{CancelOutcome, StreamOutcome, StreamStatus};
use stream::{StreamController, StreamEvent};

/// User actions accepted by the session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Submit a typed utterance.
    SendText(String),
    /// Cancel the in-flight generation and stop any playback.
    StopStreaming,
    /// Begin a listening attempt.
    StartListening,
    /// End the listening attempt, submitting its transcript if non-blank.
    StopListening,
    /// Toggle auto-restarting capture after each utterance and reply.
    SetAlwaysListen(bool),
    /// Toggle speaking completed replies aloud.
    SetSpeakResponses(bool),
    /// Select the synthesis voice (None = backend default).
    SetVoice(Option<String>),
    /// Drop the conversation history.
    ClearConversation,
    /// Request a point-in-time copy of the session state.
    Snapshot(oneshot::Sender<SessionSnapshot>),
    /// Tear everything down and end the loop.
    Shutdown,
}

/// Observable session activity, broadcast to subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The growing (or just-finalized) assistant message re-rendered.
    AssistantContent { message: Uuid, blocks: Vec<Block> },
    /// A cancelled-before-content placeholder left the log.
    MessageDiscarded { message: Uuid },
    /// A stream reached a terminal status.
    StreamStatus { message: Uuid, status: StreamStatus },
    /// The visible live transcript changed (empty = cleared).
    LiveTranscript(String),
    /// The capture machine changed state.
    CaptureState(CaptureState),
    /// A dismissable notice (recognition errors, degraded capabilities).
    Notice(String),
    SpeakingStarted,
    SpeakingEnded,
    ConversationCleared,
}

/// Point-in-time copy of the session state, for UIs and tests.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub loading: bool,
    pub always_listen: bool,
    pub speak_responses: bool,
    pub capture_state: CaptureState,
    pub live_transcript: String,
    pub speaking: bool,
}

/// Client-side handle for a spawned session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Send a command to the session loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has shut down.
    pub fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Channel("session loop has shut down".into()))
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Fetch a snapshot of the session state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session has shut down.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot(tx))?;
        rx.await
            .map_err(|_| ClientError::Channel("session loop has shut down".into()))
    }
}

/// The session-state object: conversation log, mode flags, and the three
/// single-instance controllers.
pub struct ChatSession {
    log: ConversationLog,
    stream: StreamController,
    capture: CaptureMachine,
    playback: PlaybackController,
    /// A generation is in flight; capture must not start.
    loading: bool,
    always_listen: bool,
    settle_delay: Duration,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    stream_rx: mpsc::UnboundedReceiver<StreamEvent>,
    capture_rx: mpsc::UnboundedReceiver<CaptureEvent>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    rearm_rx: mpsc::UnboundedReceiver<()>,
    rearm_tx: mpsc::UnboundedSender<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    /// Build a session and its client handle.
    ///
    /// `recognizer` and `sink` are optional capabilities; absence degrades
    /// voice features without affecting the text-chat path.
    pub fn new(
        config: &ClientConfig,
        backend: Arc<dyn ChatBackend>,
        recognizer: Option<Arc<dyn Recognizer>>,
        sink: Option<Arc<dyn AudioSink>>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let (rearm_tx, rearm_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);

        let mut playback =
            PlaybackController::new(Arc::clone(&backend), sink, playback_tx);
        playback.set_enabled(config.voice.speak_responses);
        playback.set_voice(config.voice.voice.clone());

        let session = Self {
            log: ConversationLog::new(),
            stream: StreamController::new(backend, config.backend.model.clone(), stream_tx),
            capture: CaptureMachine::new(recognizer, capture_tx),
            playback,
            loading: false,
            always_listen: config.capture.always_listen,
            settle_delay: Duration::from_millis(config.capture.settle_delay_ms),
            commands: command_rx,
            stream_rx,
            capture_rx,
            playback_rx,
            rearm_rx,
            rearm_tx,
            events: event_tx.clone(),
        };
        let handle = SessionHandle {
            commands: command_tx,
            events: event_tx,
        };
        (session, handle)
    }

    /// Build a session, spawn its loop, and return the client handle.
    pub fn spawn(
        config: &ClientConfig,
        backend: Arc<dyn ChatBackend>,
        recognizer: Option<Arc<dyn Recognizer>>,
        sink: Option<Arc<dyn AudioSink>>,
    ) -> SessionHandle {
        let (session, handle) = Self::new(config, backend, recognizer, sink);
        tokio::spawn(session.run());
        handle
    }

    /// Run the event loop until shutdown.
    pub async fn run(mut self) {
        info!("chat session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => break, // all handles dropped
                },
                Some(event) = self.stream_rx.recv() => self.handle_stream_event(event),
                Some(event) = self.capture_rx.recv() => self.handle_capture_event(event),
                Some(event) = self.playback_rx.recv() => self.handle_playback_event(event),
                Some(()) = self.rearm_rx.recv() => self.try_rearm(),
            }
        }
        self.teardown();
        info!("chat session stopped");
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; the loop runs headless in tests.
        let _ = self.events.send(event);
    }

    /// Returns false when the loop should stop.
    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::SendText(text) => {
                let text = text.trim().to_owned();
                if !text.is_empty() {
                    self.begin_stream(&text);
                }
            }
            SessionCommand::StopStreaming => self.stop_streaming(),
            SessionCommand::StartListening => self.start_capture(),
            SessionCommand::StopListening => {
                let transcript = self.capture.stop_listening();
                self.emit(SessionEvent::LiveTranscript(String::new()));
                self.emit(SessionEvent::CaptureState(self.capture.state()));
                match transcript {
                    Some(text) if !self.loading => self.begin_stream(&text),
                    _ => self.schedule_rearm(),
                }
            }
            SessionCommand::SetAlwaysListen(enabled) => {
                self.always_listen = enabled;
                if enabled {
                    self.start_capture();
                } else if self.capture.is_active() {
                    self.capture.abort();
                    self.emit(SessionEvent::LiveTranscript(String::new()));
                    self.emit(SessionEvent::CaptureState(self.capture.state()));
                }
            }
            SessionCommand::SetSpeakResponses(enabled) => {
                let was_speaking = self.playback.is_speaking();
                self.playback.set_enabled(enabled);
                if was_speaking && !enabled {
                    self.emit(SessionEvent::SpeakingEnded);
                }
            }
            SessionCommand::SetVoice(voice) => self.playback.set_voice(voice),
            SessionCommand::ClearConversation => {
                if self.playback.interrupt() {
                    self.emit(SessionEvent::SpeakingEnded);
                }
                self.stream.cancel(&mut self.log);
                self.loading = false;
                self.capture.abort();
                self.log.clear();
                self.emit(SessionEvent::ConversationCleared);
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown => return false,
        }
        true
    }

    /// Start streaming a reply to `utterance`, superseding everything
    /// else that is live: playback stops, capture aborts, and any prior
    /// stream is cancelled inside [`StreamController::begin`].
    fn begin_stream(&mut self, utterance: &str) {
        if self.playback.interrupt() {
            self.emit(SessionEvent::SpeakingEnded);
        }
        if self.capture.is_active() {
            self.capture.abort();
            self.emit(SessionEvent::LiveTranscript(String::new()));
            self.emit(SessionEvent::CaptureState(self.capture.state()));
        }

        self.loading = true;
        let (message, superseded) = self.stream.begin(&mut self.log, utterance);
        if let Some(outcome) = superseded {
            self.emit_cancelled(outcome);
        }
        self.emit(SessionEvent::AssistantContent {
            message,
            blocks: Vec::new(),
        });
    }

    fn stop_streaming(&mut self) {
        if self.playback.interrupt() {
            self.emit(SessionEvent::SpeakingEnded);
        }
        if let Some(outcome) = self.stream.cancel(&mut self.log) {
            self.loading = false;
            self.emit_cancelled(outcome);
            self.schedule_rearm();
        }
    }

    fn emit_cancelled(&self, outcome: CancelOutcome) {
        let message = match outcome {
            CancelOutcome::Discarded { message } => {
                self.emit(SessionEvent::MessageDiscarded { message });
                message
            }
            CancelOutcome::KeptPartial { message } => message,
        };
        self.emit(SessionEvent::StreamStatus {
            message,
            status: StreamStatus::Cancelled,
        });
    }

    /// Begin a listening attempt; no-op while a generation is in flight
    /// (capture and generation are mutually exclusive) or while capture
    /// is already active. A failure disables always-listen rather than
    /// retrying.
    fn start_capture(&mut self) {
        if self.loading {
            debug!("not starting capture: generation in flight");
            return;
        }
        if self.capture.is_active() {
            return;
        }
        match self.capture.start_listening() {
            Ok(()) => self.emit(SessionEvent::CaptureState(self.capture.state())),
            Err(e) => {
                self.always_listen = false;
                self.emit(SessionEvent::Notice(e.to_string()));
                self.emit(SessionEvent::CaptureState(self.capture.state()));
            }
        }
    }

    fn handle_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Chunk { stream, text } => {
                if let Some(message) = self.stream.apply_chunk(&mut self.log, stream, &text) {
                    let blocks = render(self.log.content_of(message).unwrap_or(""));
                    self.emit(SessionEvent::AssistantContent { message, blocks });
                }
            }
            StreamEvent::Closed { stream, result } => {
                let Some(outcome) = self.stream.finish(&mut self.log, stream, result) else {
                    return;
                };
                self.loading = false;
                match outcome {
                    StreamOutcome::Completed {
                        message,
                        final_text,
                    } => {
                        self.emit(SessionEvent::StreamStatus {
                            message,
                            status: StreamStatus::Completed,
                        });
                        if !final_text.trim().is_empty() {
                            // Fire-and-forget: playback failures never
                            // surface as stream failures.
                            self.playback.speak(&final_text);
                        }
                    }
                    StreamOutcome::Errored { message, surfaced } => {
                        if surfaced {
                            let blocks = render(self.log.content_of(message).unwrap_or(""));
                            self.emit(SessionEvent::AssistantContent { message, blocks });
                        }
                        self.emit(SessionEvent::StreamStatus {
                            message,
                            status: StreamStatus::Errored,
                        });
                    }
                }
                self.schedule_rearm();
            }
        }
    }

    fn handle_capture_event(&mut self, event: CaptureEvent) {
        match self.capture.handle_event(event) {
            CaptureAction::None => {}
            CaptureAction::BargeIn => {
                // Processed before any later recognition result: capture
                // events travel one ordered channel.
                if self.playback.interrupt() {
                    self.emit(SessionEvent::SpeakingEnded);
                }
            }
            CaptureAction::TranscriptChanged => {
                self.emit(SessionEvent::LiveTranscript(
                    self.capture.live_transcript().to_owned(),
                ));
            }
            CaptureAction::Submit(transcript) => {
                self.emit(SessionEvent::LiveTranscript(String::new()));
                self.emit(SessionEvent::CaptureState(self.capture.state()));
                match transcript {
                    Some(text) if !self.loading => self.begin_stream(&text),
                    _ => self.schedule_rearm(),
                }
            }
            CaptureAction::Errored(message) => {
                self.always_listen = false;
                self.emit(SessionEvent::Notice(format!(
                    "Speech recognition error: {message}"
                )));
                self.emit(SessionEvent::CaptureState(self.capture.state()));
            }
        }
    }

    fn handle_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::SynthesisReady { playback, audio } => {
                if self.playback.on_synthesis_ready(playback, audio) {
                    self.emit(SessionEvent::SpeakingStarted);
                }
            }
            PlaybackEvent::Finished { playback } => {
                if self.playback.on_finished(playback) {
                    self.emit(SessionEvent::SpeakingEnded);
                }
            }
        }
    }

    /// Queue a capture restart after the settling delay. The delay keeps
    /// the recognizer from re-capturing the tail of the just-submitted
    /// speech or this loop's own teardown side effects.
    fn schedule_rearm(&self) {
        if !self.always_listen || self.loading {
            return;
        }
        let tx = self.rearm_tx.clone();
        let delay = self.settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(());
        });
    }

    /// A rearm tick only starts capture if nothing changed meanwhile.
    fn try_rearm(&mut self) {
        if !self.always_listen || self.loading || self.capture.is_active() {
            return;
        }
        self.start_capture();
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.log.messages().to_vec(),
            loading: self.loading,
            always_listen: self.always_listen,
            speak_responses: self.playback.enabled(),
            capture_state: self.capture.state(),
            live_transcript: self.capture.live_transcript().to_owned(),
            speaking: self.playback.is_speaking(),
        }
    }

    fn teardown(&mut self) {
        self.playback.interrupt();
        self.capture.abort();
        self.stream.cancel(&mut self.log);
    }
}
