//! End-to-end session tests over scripted fake capabilities.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, oneshot};

use colloquy::audio::{AudioSink, AudioVoice};
use colloquy::backend::{ChatRequest, TextChunkStream};
use colloquy::error::{ClientError, Result};
use colloquy::session::{ChatSession, SessionCommand, SessionEvent};
use colloquy::{ChatBackend, ClientConfig, Role, StreamStatus};

/// Backend with per-utterance chunk scripts; `"hang"` streams forever.
struct ScriptedBackend {
    scripts: Mutex<std::collections::HashMap<String, Vec<String>>>,
    synth_calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedBackend {
    fn new(scripts: &[(&str, &[&str])]) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(
                scripts
                    .iter()
                    .map(|(k, v)| ((*k).to_owned(), v.iter().map(|s| (*s).to_owned()).collect()))
                    .collect(),
            ),
            synth_calls: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<TextChunkStream> {
        let key = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if key == "hang" {
            return Ok(Box::pin(futures_util::stream::pending()));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(&key)
            .ok_or_else(|| ClientError::Transport(format!("no script for {key:?}")))?;
        Ok(Box::pin(futures_util::stream::iter(
            script.into_iter().map(Ok),
        )))
    }

    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<Bytes> {
        self.synth_calls.lock().unwrap().push(text.to_owned());
        Ok(Bytes::from_static(b"RIFFfake"))
    }
}

struct SilentVoice;

impl AudioVoice for SilentVoice {
    fn pause(&mut self) {}
    fn rewind(&mut self) {}
}

struct FakeSink;

impl AudioSink for FakeSink {
    fn play(&self, _wav: Bytes, _finished: oneshot::Sender<()>) -> Result<Box<dyn AudioVoice>> {
        Ok(Box::new(SilentVoice))
    }
}

async fn next_matching<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("session event channel closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn streamed_reply_lands_in_the_log_and_is_spoken_once() {
    let backend = ScriptedBackend::new(&[("hi", &["He", "llo!"])]);
    let synth_calls = Arc::clone(&backend.synth_calls);
    let handle = ChatSession::spawn(
        &ClientConfig::default(),
        Arc::clone(&backend) as Arc<dyn ChatBackend>,
        None,
        Some(Arc::new(FakeSink) as Arc<dyn AudioSink>),
    );
    let mut events = handle.subscribe();

    handle.send(SessionCommand::SendText("hi".into())).unwrap();
    next_matching(&mut events, |e| {
        matches!(
            e,
            SessionEvent::StreamStatus {
                status: StreamStatus::Completed,
                ..
            }
        )
    })
    .await;

    // Playback starting proves synthesis ran exactly once with the final
    // text, not per chunk.
    next_matching(&mut events, |e| matches!(e, SessionEvent::SpeakingStarted)).await;
    assert_eq!(*synth_calls.lock().unwrap(), vec!["Hello!"]);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[0].role(), Role::User);
    assert_eq!(snapshot.messages[0].content(), "hi");
    assert_eq!(snapshot.messages[1].role(), Role::Assistant);
    assert_eq!(snapshot.messages[1].content(), "Hello!");
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn cancelling_before_content_discards_the_placeholder() {
    let backend = ScriptedBackend::new(&[]);
    let handle = ChatSession::spawn(
        &ClientConfig::default(),
        backend as Arc<dyn ChatBackend>,
        None,
        None,
    );
    let mut events = handle.subscribe();

    handle.send(SessionCommand::SendText("hang".into())).unwrap();
    handle.send(SessionCommand::StopStreaming).unwrap();

    next_matching(&mut events, |e| {
        matches!(
            e,
            SessionEvent::StreamStatus {
                status: StreamStatus::Cancelled,
                ..
            }
        )
    })
    .await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].content(), "hang");
    assert!(!snapshot.loading);
}

#[tokio::test]
async fn transport_failure_renders_as_error_content() {
    // No script for the utterance: opening the stream fails.
    let backend = ScriptedBackend::new(&[]);
    let handle = ChatSession::spawn(
        &ClientConfig::default(),
        backend as Arc<dyn ChatBackend>,
        None,
        None,
    );
    let mut events = handle.subscribe();

    handle.send(SessionCommand::SendText("hi".into())).unwrap();
    next_matching(&mut events, |e| {
        matches!(
            e,
            SessionEvent::StreamStatus {
                status: StreamStatus::Errored,
                ..
            }
        )
    })
    .await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    assert!(
        snapshot.messages[1].content().starts_with("Error:"),
        "got {:?}",
        snapshot.messages[1].content()
    );
}

#[tokio::test]
async fn a_new_utterance_supersedes_the_hung_stream() {
    let backend = ScriptedBackend::new(&[("second", &["second reply"])]);
    let handle = ChatSession::spawn(
        &ClientConfig::default(),
        backend as Arc<dyn ChatBackend>,
        None,
        None,
    );
    let mut events = handle.subscribe();

    handle.send(SessionCommand::SendText("hang".into())).unwrap();
    handle.send(SessionCommand::SendText("second".into())).unwrap();

    next_matching(&mut events, |e| {
        matches!(
            e,
            SessionEvent::StreamStatus {
                status: StreamStatus::Completed,
                ..
            }
        )
    })
    .await;

    let snapshot = handle.snapshot().await.unwrap();
    let contents: Vec<&str> = snapshot.messages.iter().map(|m| m.content()).collect();
    // The hung stream's placeholder was discarded; both user turns stay.
    assert_eq!(contents, vec!["hang", "second", "second reply"]);
}

#[tokio::test]
async fn clear_conversation_empties_the_log() {
    let backend = ScriptedBackend::new(&[("hi", &["Hello!"])]);
    let handle = ChatSession::spawn(
        &ClientConfig::default(),
        backend as Arc<dyn ChatBackend>,
        None,
        None,
    );
    let mut events = handle.subscribe();

    handle.send(SessionCommand::SendText("hi".into())).unwrap();
    next_matching(&mut events, |e| {
        matches!(
            e,
            SessionEvent::StreamStatus {
                status: StreamStatus::Completed,
                ..
            }
        )
    })
    .await;

    handle.send(SessionCommand::ClearConversation).unwrap();
    next_matching(&mut events, |e| matches!(e, SessionEvent::ConversationCleared)).await;
    assert!(handle.snapshot().await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn start_listening_without_recognizer_posts_a_notice() {
    let backend = ScriptedBackend::new(&[]);
    let handle = ChatSession::spawn(
        &ClientConfig::default(),
        backend as Arc<dyn ChatBackend>,
        None,
        None,
    );
    let mut events = handle.subscribe();

    handle.send(SessionCommand::SetAlwaysListen(true)).unwrap();
    handle.send(SessionCommand::StartListening).unwrap();

    let SessionEvent::Notice(notice) =
        next_matching(&mut events, |e| matches!(e, SessionEvent::Notice(_))).await
    else {
        unreachable!();
    };
    assert!(notice.contains("capability missing"), "got {notice:?}");

    // One-shot degrade: the preference is off, no retry loop.
    let snapshot = handle.snapshot().await.unwrap();
    assert!(!snapshot.always_listen);
}
