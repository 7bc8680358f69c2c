//! Colloquy: a voice-capable streaming chat client core.
//!
//! Text goes to a generation backend, the incrementally-streamed reply is
//! re-rendered as structured blocks on every chunk, and finished replies
//! are optionally spoken aloud while capture keeps listening for the next
//! utterance (always-on voice with barge-in).
//!
//! # Architecture
//!
//! A single [`session::ChatSession`] event loop owns all mutable state and
//! arbitrates three independently-paced async sources:
//! - **Stream**: the one in-flight generation request, cancellable,
//!   feeding the growing assistant message
//! - **Capture**: a state machine over an abstract [`capture::Recognizer`]
//!   capability, with auto-restart and barge-in
//! - **Playback**: at most one spoken utterance via an abstract
//!   [`audio::AudioSink`] capability
//!
//! The recognition and audio capabilities are optional at runtime; without
//! them the text-chat path works unchanged.

pub mod audio;
pub mod backend;
pub mod capture;
pub mod config;
pub mod conversation;
pub mod error;
pub mod playback;
pub mod render;
pub mod session;

pub use backend::{BackendClient, ChatBackend};
pub use config::ClientConfig;
pub use conversation::{ConversationLog, Message, Role};
pub use error::{ClientError, Result};
pub use render::{Block, render, render_html};
pub use session::{ChatSession, SessionCommand, SessionEvent, SessionHandle, StreamStatus};
