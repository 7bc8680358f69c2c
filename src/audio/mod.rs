//! Audio output capability.
//!
//! The session depends only on the [`AudioSink`] and [`AudioVoice`] traits;
//! a cpal-backed implementation ships behind the `audio-io` feature for
//! hosts without their own audio path. Absence of a sink degrades playback
//! silently — the text conversation never depends on it.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::Result;

#[cfg(feature = "audio-io")]
mod sink;

#[cfg(feature = "audio-io")]
pub use sink::CpalSink;

/// One playing utterance.
///
/// Dropping the voice releases its backing audio resource; that is the
/// only way to release it, so release happens exactly once.
pub trait AudioVoice: Send {
    /// Stop producing samples without releasing the resource.
    fn pause(&mut self);

    /// Reset the playback position to the start.
    fn rewind(&mut self);
}

/// An audio output device that can play one synthesized utterance.
pub trait AudioSink: Send + Sync {
    /// Begin playing a WAV payload.
    ///
    /// `finished` fires when playback reaches the natural end of the
    /// payload; it does not fire when the returned voice is paused or
    /// dropped early.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be decoded or the output
    /// stream cannot be opened.
    fn play(&self, wav: Bytes, finished: oneshot::Sender<()>) -> Result<Box<dyn AudioVoice>>;
}
