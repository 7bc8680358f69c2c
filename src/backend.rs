//! HTTP client for the generation backend.
//!
//! The backend exposes four endpoints: `POST /chat` (streamed plain-text
//! reply chunks), `POST /speak` (synthesized WAV bytes), `GET /voices`
//! (available synthesis voices) and `GET /health`. Chat replies stream as
//! raw UTF-8 text, so chunk boundaries can split multibyte sequences;
//! [`Utf8ChunkDecoder`] reassembles them before chunks reach the session.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::BackendConfig;
use crate::conversation::ConversationLog;
use crate::error::{ClientError, Result};

/// A streamed sequence of decoded reply-text chunks.
pub type TextChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One message in a chat request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Request payload for `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Build a request from the conversation log.
    ///
    /// Only non-blank messages are included, so the in-flight assistant
    /// placeholder is never echoed back as context.
    pub fn from_log(model: &str, log: &ConversationLog) -> Self {
        let messages = log
            .non_blank()
            .map(|m| ChatMessage {
                role: m.role().as_str().to_owned(),
                content: m.content().to_owned(),
            })
            .collect();
        Self {
            model: model.to_owned(),
            messages,
        }
    }
}

/// Request payload for `POST /speak`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// Available synthesis voices reported by `GET /voices`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceCatalog {
    /// Backend's default voice, if reported.
    pub default_voice: Option<String>,
    /// Voice IDs, sorted when the backend reports a map.
    pub voices: Vec<String>,
}

impl VoiceCatalog {
    pub fn is_empty(&self) -> bool {
        self.default_voice.is_none() && self.voices.is_empty()
    }

    /// Parse the catalog from the backend's JSON reply.
    ///
    /// The voices field may be a list of IDs or a map keyed by ID
    /// (depending on the synthesis service behind the backend); anything
    /// else yields an empty catalog rather than an error.
    fn from_value(value: &serde_json::Value) -> Self {
        let default_voice = value
            .get("default_voice")
            .and_then(|v| v.as_str())
            .map(String::from);
        let voices = match value.get("voices") {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(serde_json::Value::Object(map)) => {
                let mut ids: Vec<String> = map.keys().cloned().collect();
                ids.sort();
                ids
            }
            _ => Vec::new(),
        };
        Self {
            default_voice,
            voices,
        }
    }
}

/// Generation and synthesis operations the session depends on.
///
/// Abstracting the HTTP client behind a trait keeps the session loop
/// testable with scripted chunk sequences.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open a streaming chat completion for the given request.
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TextChunkStream>;

    /// Synthesize speech for `text`; returns the audio payload (WAV bytes).
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Bytes>;
}

/// Reqwest-based client for the generation backend.
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl BackendClient {
    /// Create a client for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClientError::Transport(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    /// Fetch the voice catalog. Best-effort: unreachable or malformed
    /// replies yield an empty catalog, never an error.
    pub async fn voices(&self) -> VoiceCatalog {
        let url = format!("{}/voices", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("voice catalog unreachable: {e}");
                return VoiceCatalog::default();
            }
        };
        if !response.status().is_success() {
            debug!("voice catalog returned HTTP {}", response.status());
            return VoiceCatalog::default();
        }
        match response.json::<serde_json::Value>().await {
            Ok(value) => VoiceCatalog::from_value(&value),
            Err(e) => {
                debug!("voice catalog parse failed: {e}");
                VoiceCatalog::default()
            }
        }
    }

    /// True if the backend answers its health probe.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<serde_json::Value>()
                .await
                .map(|value| value["status"] == "ok")
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[async_trait]
impl ChatBackend for BackendClient {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TextChunkStream> {
        let url = format!("{}/chat", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Transport(format!(
                "chat failed with HTTP {}: {}",
                status.as_u16(),
                body.trim(),
            )));
        }

        Ok(text_chunk_stream(response.bytes_stream()))
    }

    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<Bytes> {
        let url = format!("{}/speak", self.base_url);
        let request = SpeakRequest {
            text: text.to_owned(),
            voice: voice.map(str::to_owned),
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::Synthesis(format!("speak request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Synthesis(format!(
                "speak failed with HTTP {}: {}",
                status.as_u16(),
                body.trim(),
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| ClientError::Synthesis(format!("audio read failed: {e}")))
    }
}

/// Convert a raw byte stream into decoded text chunks.
fn text_chunk_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> TextChunkStream {
    let stream = async_stream::stream! {
        let mut decoder = Utf8ChunkDecoder::new();
        let mut bytes = Box::pin(byte_stream);
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    let text = decoder.push(&chunk);
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                }
                Err(e) => {
                    yield Err(ClientError::Transport(format!("stream read error: {e}")));
                    return;
                }
            }
        }
        let tail = decoder.flush();
        if !tail.is_empty() {
            yield Ok(tail);
        }
    };
    Box::pin(stream)
}

/// Incremental UTF-8 decoder for chunk boundaries that split multibyte
/// sequences.
#[derive(Debug, Default)]
struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    fn new() -> Self {
        Self::default()
    }

    /// Feed one byte chunk; returns the text decodable so far.
    fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Truly invalid sequence: substitute and move on.
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        // Incomplete tail: wait for the next chunk.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling incomplete tail at end of stream.
    fn flush(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    // ── Utf8ChunkDecoder ──────────────────────────────────────

    #[test]
    fn decoder_passes_ascii_through() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b"Hello"), "Hello");
        assert_eq!(decoder.push(b" world"), " world");
        assert_eq!(decoder.flush(), "");
    }

    #[test]
    fn decoder_reassembles_split_multibyte() {
        // U+00E9 is 0xC3 0xA9; split it across two chunks.
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&[b'c', b'a', b'f', 0xC3]), "caf");
        assert_eq!(decoder.push(&[0xA9, b'!']), "é!");
    }

    #[test]
    fn decoder_reassembles_split_four_byte_char() {
        let emoji = "🎤".as_bytes(); // 4 bytes
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&emoji[..2]), "");
        assert_eq!(decoder.push(&emoji[2..]), "🎤");
    }

    #[test]
    fn decoder_substitutes_invalid_byte() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn decoder_flush_substitutes_dangling_tail() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&[0xC3]), "");
        assert_eq!(decoder.flush(), "\u{FFFD}");
    }

    // ── request shapes ────────────────────────────────────────

    #[test]
    fn chat_request_filters_blank_messages() {
        let mut log = ConversationLog::new();
        log.push_user("hi");
        log.push_assistant_placeholder();

        let request = ChatRequest::from_log("qwen2.5:1.5b", &log);
        assert_eq!(request.model, "qwen2.5:1.5b");
        assert_eq!(
            request.messages,
            vec![ChatMessage {
                role: "user".to_owned(),
                content: "hi".to_owned(),
            }]
        );
    }

    #[test]
    fn speak_request_omits_absent_voice() {
        let request = SpeakRequest {
            text: "Hello!".to_owned(),
            voice: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["text"], "Hello!");
        assert!(value.get("voice").is_none());

        let with_voice = SpeakRequest {
            text: "Hello!".to_owned(),
            voice: Some("coqui-tts:en_ljspeech".to_owned()),
        };
        let value = serde_json::to_value(&with_voice).unwrap();
        assert_eq!(value["voice"], "coqui-tts:en_ljspeech");
    }

    // ── VoiceCatalog ──────────────────────────────────────────

    #[test]
    fn voice_catalog_from_list() {
        let value = serde_json::json!({
            "default_voice": "coqui-tts:en_ljspeech",
            "voices": ["a", "b"],
        });
        let catalog = VoiceCatalog::from_value(&value);
        assert_eq!(catalog.default_voice.as_deref(), Some("coqui-tts:en_ljspeech"));
        assert_eq!(catalog.voices, vec!["a", "b"]);
    }

    #[test]
    fn voice_catalog_from_map_sorts_keys() {
        let value = serde_json::json!({
            "default_voice": "b",
            "voices": { "b": {"lang": "en"}, "a": {"lang": "de"} },
        });
        let catalog = VoiceCatalog::from_value(&value);
        assert_eq!(catalog.voices, vec!["a", "b"]);
    }

    #[test]
    fn voice_catalog_tolerates_junk() {
        let catalog = VoiceCatalog::from_value(&serde_json::json!({"voices": 7}));
        assert!(catalog.is_empty());
        let catalog = VoiceCatalog::from_value(&serde_json::json!({}));
        assert!(catalog.is_empty());
    }
}
