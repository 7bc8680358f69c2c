//! Spoken-reply playback controller.
//!
//! At most one playback handle is alive at a time; starting a new
//! utterance supersedes the old one, and barge-in / stop-streaming both
//! route through [`PlaybackController::interrupt`]. Voice is best-effort:
//! synthesis and playback failures are logged and swallowed so they can
//! never corrupt the text conversation.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::audio::{AudioSink, AudioVoice};
use crate::backend::ChatBackend;

/// Events reported back to the session loop by playback tasks.
#[derive(Debug)]
pub enum PlaybackEvent {
    /// Synthesis finished for the playback with this id.
    SynthesisReady { playback: u64, audio: Bytes },
    /// The playback with this id reached its natural end.
    Finished { playback: u64 },
}

/// One playing utterance: the voice resource plus its id for stale-event
/// checks. Dropping it releases the audio resource.
struct PlaybackHandle {
    id: u64,
    voice: Box<dyn AudioVoice>,
}

/// Owns the single active playback and the synthesis request feeding it.
pub struct PlaybackController {
    backend: Arc<dyn ChatBackend>,
    sink: Option<Arc<dyn AudioSink>>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    enabled: bool,
    voice: Option<String>,
    /// Id of the synthesis request we are waiting on, if any.
    pending: Option<u64>,
    active: Option<PlaybackHandle>,
    next_id: u64,
}

impl PlaybackController {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        sink: Option<Arc<dyn AudioSink>>,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Self {
        Self {
            backend,
            sink,
            events,
            enabled: true,
            voice: None,
            pending: None,
            active: None,
            next_id: 0,
        }
    }

    /// Whether completed replies are spoken aloud.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.interrupt();
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Synthesis voice id sent with speak requests (None = backend default).
    pub fn set_voice(&mut self, voice: Option<String>) {
        self.voice = voice;
    }

    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    /// True while an utterance is audibly playing.
    pub fn is_speaking(&self) -> bool {
        self.active.is_some()
    }

    /// Speak `text` aloud. No-op when speaking is disabled, the text is
    /// blank, or no audio sink is available.
    ///
    /// Any current playback (or in-flight synthesis) is superseded first.
    /// The synthesis request runs in a spawned task; its result comes back
    /// through the event channel as [`PlaybackEvent::SynthesisReady`].
    pub fn speak(&mut self, text: &str) {
        if !self.enabled || text.trim().is_empty() {
            return;
        }
        self.interrupt();
        if self.sink.is_none() {
            debug!("no audio sink; skipping synthesis");
            return;
        }

        self.next_id += 1;
        let id = self.next_id;
        self.pending = Some(id);

        let backend = Arc::clone(&self.backend);
        let events = self.events.clone();
        let text = text.to_owned();
        let voice = self.voice.clone();
        tokio::spawn(async move {
            match backend.synthesize(&text, voice.as_deref()).await {
                Ok(audio) => {
                    let _ = events.send(PlaybackEvent::SynthesisReady {
                        playback: id,
                        audio,
                    });
                }
                // Best-effort: a failed synthesis just means silence.
                Err(e) => warn!("speech synthesis failed: {e}"),
            }
        });
    }

    /// Start playing a finished synthesis. Returns true if playback
    /// actually started; stale results (superseded before synthesis
    /// completed) are dropped.
    pub fn on_synthesis_ready(&mut self, playback: u64, audio: Bytes) -> bool {
        if self.pending != Some(playback) {
            debug!("dropping stale synthesis result (playback {playback})");
            return false;
        }
        self.pending = None;
        let Some(sink) = self.sink.as_ref() else {
            return false;
        };

        let (finished_tx, finished_rx) = oneshot::channel();
        let events = self.events.clone();
        tokio::spawn(async move {
            if finished_rx.await.is_ok() {
                let _ = events.send(PlaybackEvent::Finished { playback });
            }
        });

        match sink.play(audio, finished_tx) {
            Ok(voice) => {
                self.active = Some(PlaybackHandle {
                    id: playback,
                    voice,
                });
                true
            }
            Err(e) => {
                warn!("audio playback failed: {e}");
                false
            }
        }
    }

    /// Handle a natural end-of-playback. Returns true if it ended the
    /// current handle (stale notifications are ignored).
    pub fn on_finished(&mut self, playback: u64) -> bool {
        match &self.active {
            Some(handle) if handle.id == playback => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    /// Stop and release any current playback. Idempotent; also discards
    /// an in-flight synthesis so its result cannot start late playback.
    ///
    /// Returns true if an audible playback was interrupted.
    pub fn interrupt(&mut self) -> bool {
        self.pending = None;
        match self.active.take() {
            Some(mut handle) => {
                handle.voice.pause();
                handle.voice.rewind();
                // Dropping the handle releases the audio resource.
                true
            }
            None => false,
        }
    }
}
