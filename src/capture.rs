//! Speech capture state machine.
//!
//! Wraps an abstract continuous [`Recognizer`] capability and tracks one
//! listening attempt at a time: interim results replace each other, final
//! results accumulate, and a "speech started" signal preempts playback
//! (barge-in) before any transcript text arrives. Recognition errors
//! degrade the always-listen preference instead of retrying.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// One recognition result inside an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    /// Transcript text for this result.
    pub text: String,
    /// Whether the recognizer has committed to this text.
    pub is_final: bool,
}

/// Events emitted by a running recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// The capture resource detected speech (fires before any result).
    SpeechStarted,
    /// A batch of results; `start_index` is the absolute index of the
    /// first entry, monotonic across the life of one recognizer session.
    Results {
        start_index: usize,
        results: Vec<RecognitionResult>,
    },
    /// The recognizer failed; the session is over.
    Error(String),
    /// The recognizer ended on its own (silence timeout or stop).
    Ended,
}

/// A running recognizer session; dropping it (or calling `stop`) releases
/// the underlying capture resource.
pub trait RecognizerSession: Send {
    /// Ask the recognizer to stop listening.
    fn stop(&mut self);
}

/// Continuous speech recognition capability.
///
/// The host may not provide one; the capture machine treats `None` as a
/// capability-missing degrade, not an error loop.
pub trait Recognizer: Send + Sync {
    /// Start a listening session, delivering events on `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the capture resource cannot be acquired.
    fn start(
        &self,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<Box<dyn RecognizerSession>>;
}

/// Capture machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    Listening,
    Finalizing,
    Errored,
}

/// A recognition event tagged with the capture session it belongs to.
///
/// Stale sessions keep their id after teardown, so late events from a
/// superseded recognizer are recognized and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub session: u64,
    pub event: RecognitionEvent,
}

/// What the session loop must do in response to a capture event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureAction {
    /// Nothing to do (stale event, or no observable change).
    None,
    /// Speech detected: interrupt any active playback now, before any
    /// later recognition result is processed.
    BargeIn,
    /// The live transcript changed.
    TranscriptChanged,
    /// The session ended; `Some` carries a non-blank trimmed transcript
    /// to submit as an utterance.
    Submit(Option<String>),
    /// Recognition failed; disable always-listen and surface the notice.
    Errored(String),
}

/// State machine for one listening attempt at a time.
pub struct CaptureMachine {
    recognizer: Option<std::sync::Arc<dyn Recognizer>>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    state: CaptureState,
    session_id: u64,
    session: Option<Box<dyn RecognizerSession>>,
    interim: String,
    finals: String,
    resume_index: usize,
    last_error: Option<String>,
}

impl CaptureMachine {
    pub fn new(
        recognizer: Option<std::sync::Arc<dyn Recognizer>>,
        events: mpsc::UnboundedSender<CaptureEvent>,
    ) -> Self {
        Self {
            recognizer,
            events,
            state: CaptureState::Idle,
            session_id: 0,
            session: None,
            interim: String::new(),
            finals: String::new(),
            resume_index: 0,
            last_error: None,
        }
    }

    /// True if the host provides a recognition capability at all.
    pub fn has_recognizer(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// True while a listening attempt is underway.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            CaptureState::Starting | CaptureState::Listening | CaptureState::Finalizing
        )
    }

    /// The transcript a UI should show right now: interim text when
    /// present, else the cumulative final text.
    pub fn live_transcript(&self) -> &str {
        if self.interim.is_empty() {
            &self.finals
        } else {
            &self.interim
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        if self.state == CaptureState::Errored {
            self.state = CaptureState::Idle;
        }
    }

    /// Begin a new listening attempt.
    ///
    /// No-op if one is already underway. The caller is responsible for the
    /// generation/capture mutual exclusion (never start while a reply is
    /// streaming).
    ///
    /// # Errors
    ///
    /// `CapabilityMissing` when the host has no recognizer; any other
    /// error means the capture resource could not be acquired.
    pub fn start_listening(&mut self) -> Result<()> {
        if self.is_active() {
            debug!("start_listening ignored: capture already active");
            return Ok(());
        }
        let recognizer = self
            .recognizer
            .as_ref()
            .ok_or_else(|| ClientError::CapabilityMissing("no speech recognition".into()))?;

        self.session_id += 1;
        let id = self.session_id;
        self.interim.clear();
        self.finals.clear();
        self.resume_index = 0;
        self.last_error = None;

        // Recognizers emit untagged events; a forwarder stamps them with
        // the session id so late arrivals from a torn-down session are
        // identifiable. It exits when the recognizer drops its sender.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let tagged = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if tagged.send(CaptureEvent { session: id, event }).is_err() {
                    break;
                }
            }
        });

        match recognizer.start(tx) {
            Ok(session) => {
                self.session = Some(session);
                self.state = CaptureState::Starting;
                Ok(())
            }
            Err(e) => {
                self.state = CaptureState::Idle;
                Err(e)
            }
        }
    }

    /// Stop the current attempt and finalize immediately.
    ///
    /// Returns the trimmed transcript when non-blank. Any events the
    /// recognizer emits after this are stale and will be ignored.
    pub fn stop_listening(&mut self) -> Option<String> {
        if !self.is_active() {
            return None;
        }
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        self.finish_session()
    }

    /// Tear down the current attempt, discarding any transcript.
    pub fn abort(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        self.session_id += 1; // late events become stale
        self.interim.clear();
        self.finals.clear();
        self.resume_index = 0;
        if self.is_active() {
            self.state = CaptureState::Idle;
        }
    }

    /// Apply one tagged recognition event.
    pub fn handle_event(&mut self, event: CaptureEvent) -> CaptureAction {
        if event.session != self.session_id || !self.is_active() {
            debug!("dropping stale capture event (session {})", event.session);
            return CaptureAction::None;
        }
        if self.state == CaptureState::Starting {
            self.state = CaptureState::Listening;
        }

        match event.event {
            RecognitionEvent::SpeechStarted => CaptureAction::BargeIn,
            RecognitionEvent::Results {
                start_index,
                results,
            } => {
                self.apply_results(start_index, results);
                CaptureAction::TranscriptChanged
            }
            RecognitionEvent::Error(message) => {
                warn!("recognition error: {message}");
                self.session = None;
                self.session_id += 1;
                self.interim.clear();
                self.finals.clear();
                self.resume_index = 0;
                self.last_error = Some(message.clone());
                self.state = CaptureState::Errored;
                CaptureAction::Errored(message)
            }
            RecognitionEvent::Ended => CaptureAction::Submit(self.finish_session()),
        }
    }

    /// Partition an update into finalized text (appended, space-joined)
    /// and interim text (replaces the previous interim).
    fn apply_results(&mut self, start_index: usize, results: Vec<RecognitionResult>) {
        let mut interim = String::new();
        for (offset, result) in results.into_iter().enumerate() {
            let index = start_index + offset;
            if index < self.resume_index {
                continue; // already consumed as final
            }
            if result.is_final {
                if !self.finals.is_empty() {
                    self.finals.push(' ');
                }
                self.finals.push_str(&result.text);
                self.resume_index = index + 1;
            } else {
                interim.push_str(&result.text);
            }
        }
        self.interim = interim;
    }

    /// Close out the session and hand back the transcript if non-blank.
    fn finish_session(&mut self) -> Option<String> {
        self.state = CaptureState::Finalizing;
        self.session = None;
        self.session_id += 1;
        self.interim.clear();
        let transcript = std::mem::take(&mut self.finals);
        self.resume_index = 0;
        self.state = CaptureState::Idle;

        let transcript = transcript.trim().to_owned();
        if transcript.is_empty() {
            None
        } else {
            Some(transcript)
        }
    }
}
