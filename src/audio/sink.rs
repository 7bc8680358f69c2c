//! Default audio sink: WAV playback to the system speakers via cpal.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::oneshot;
use tracing::{error, info};

use super::{AudioSink, AudioVoice};
use crate::error::{ClientError, Result};

/// Plays synthesized WAV payloads through the default output device.
///
/// `cpal::Stream` is not `Send`, so each voice runs on its own thread that
/// owns the stream; the [`CpalVoice`] handed back controls it through
/// shared state and stops the thread when dropped.
pub struct CpalSink;

impl CpalSink {
    /// Create a sink bound to the default output device.
    ///
    /// # Errors
    ///
    /// Returns an error if the host has no output device.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| ClientError::CapabilityMissing("no audio output device".into()))?;
        let name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {name}");
        Ok(Self)
    }
}

impl AudioSink for CpalSink {
    fn play(&self, wav: Bytes, finished: oneshot::Sender<()>) -> Result<Box<dyn AudioVoice>> {
        let (samples, sample_rate) = wav_to_mono_f32(&wav)?;
        let state = Arc::new(Mutex::new(VoiceState {
            samples,
            position: 0,
            paused: false,
            stopped: false,
            finished: false,
        }));

        let thread_state = Arc::clone(&state);
        std::thread::spawn(move || run_voice_thread(thread_state, sample_rate, finished));

        Ok(Box::new(CpalVoice { state }))
    }
}

/// Playback progress shared between the control handle, the playback
/// thread, and the cpal output callback.
struct VoiceState {
    samples: Vec<f32>,
    position: usize,
    paused: bool,
    stopped: bool,
    finished: bool,
}

/// Control handle for one playing utterance.
struct CpalVoice {
    state: Arc<Mutex<VoiceState>>,
}

impl AudioVoice for CpalVoice {
    fn pause(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.paused = true;
        }
    }

    fn rewind(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.position = 0;
        }
    }
}

impl Drop for CpalVoice {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.stopped = true;
        }
    }
}

/// Owns the cpal stream for one voice until it finishes or is stopped.
fn run_voice_thread(
    state: Arc<Mutex<VoiceState>>,
    sample_rate: u32,
    finished: oneshot::Sender<()>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        error!("audio output device disappeared before playback");
        return;
    };

    let stream_config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let callback_state = Arc::clone(&state);
    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
            let mut voice = match callback_state.lock() {
                Ok(voice) => voice,
                Err(_) => return,
            };
            for sample in data.iter_mut() {
                if voice.paused || voice.position >= voice.samples.len() {
                    *sample = 0.0;
                    if voice.position >= voice.samples.len() {
                        voice.finished = true;
                    }
                } else {
                    *sample = voice.samples[voice.position];
                    voice.position += 1;
                }
            }
        },
        move |err| {
            error!("audio output stream error: {err}");
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            error!("failed to build output stream: {e}");
            return;
        }
    };
    if let Err(e) = stream.play() {
        error!("failed to start output stream: {e}");
        return;
    }

    let ended_naturally = loop {
        std::thread::sleep(Duration::from_millis(10));
        match state.lock() {
            Ok(voice) => {
                if voice.stopped {
                    break false;
                }
                if voice.finished {
                    break true;
                }
            }
            Err(_) => break false,
        }
    };

    drop(stream);
    if ended_naturally {
        let _ = finished.send(());
    }
}

/// Decode a WAV payload to mono f32 samples plus its sample rate.
fn wav_to_mono_f32(wav: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(std::io::Cursor::new(wav))
        .map_err(|e| ClientError::Audio(format!("WAV parse failed: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| ClientError::Audio(format!("WAV decode failed: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| ClientError::Audio(format!("WAV decode failed: {e}")))?
        }
    };

    let mono = if channels == 1 {
        samples
    } else {
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn wav_bytes(spec: hound::WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn decodes_mono_pcm16() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &[0, i16::MAX, i16::MIN]);
        let (samples, rate) = wav_to_mono_f32(&bytes).unwrap();
        assert_eq!(rate, 22050);
        assert_eq!(samples.len(), 3);
        assert!((samples[0]).abs() < f32::EPSILON);
        assert!(samples[1] > 0.99);
        assert!(samples[2] < -0.99);
    }

    #[test]
    fn downmixes_stereo_to_mono() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        // Two frames: (L, R) pairs.
        let bytes = wav_bytes(spec, &[1000, 3000, -2000, 2000]);
        let (samples, _) = wav_to_mono_f32(&bytes).unwrap();
        assert_eq!(samples.len(), 2);
        let expected = 2000.0 / 32768.0;
        assert!((samples[0] - expected).abs() < 1e-4);
        assert!(samples[1].abs() < 1e-4);
    }

    #[test]
    fn rejects_garbage_payload() {
        assert!(wav_to_mono_f32(b"not a wav file").is_err());
    }
}
