//! Line-oriented REPL for the chat client.
//!
//! Each stdin line is submitted as an utterance; streamed replies print as
//! they re-render. `/stop` cancels the in-flight reply, `/clear` drops the
//! history, `/speak on|off` toggles spoken replies, `/quit` exits.
//!
//! All tracing output goes to stderr so stdout stays clean for the
//! conversation.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use colloquy::audio::AudioSink;
use colloquy::backend::BackendClient;
use colloquy::render::Span;
use colloquy::session::{ChatSession, SessionCommand, SessionEvent};
use colloquy::{Block, ChatBackend, ClientConfig, StreamStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var_os("COLLOQUY_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(ClientConfig::default_config_path);
    let config = if config_path.exists() {
        ClientConfig::from_file(&config_path)?
    } else {
        tracing::info!("no config at {}; using defaults", config_path.display());
        ClientConfig::default()
    };

    let client = BackendClient::new(&config.backend)?;
    if !client.health().await {
        tracing::warn!(
            "backend at {} is not answering its health probe",
            config.backend.base_url
        );
    }

    // Best-effort: an empty catalog just means the backend default voice.
    let catalog = client.voices().await;
    if !catalog.voices.is_empty() {
        tracing::info!("available voices: {}", catalog.voices.join(", "));
    }

    let sink = open_sink();
    let backend: Arc<dyn ChatBackend> = Arc::new(client);
    // No recognizer in the terminal: the text path degrades gracefully.
    let handle = ChatSession::spawn(&config, backend, None, sink);

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::AssistantContent { blocks, .. }) => {
                    // Clear and repaint the whole reply; the renderer
                    // re-derives every block on each chunk anyway.
                    print!("\x1b[2J\x1b[H");
                    print_blocks(&blocks);
                }
                Ok(SessionEvent::StreamStatus { status, .. }) => {
                    let label = match status {
                        StreamStatus::Completed => "done",
                        StreamStatus::Cancelled => "cancelled",
                        StreamStatus::Errored => "errored",
                    };
                    println!("\n[{label}]");
                }
                Ok(SessionEvent::Notice(notice)) => eprintln!("! {notice}"),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/stop" => handle.send(SessionCommand::StopStreaming)?,
            "/clear" => handle.send(SessionCommand::ClearConversation)?,
            "/speak on" => handle.send(SessionCommand::SetSpeakResponses(true))?,
            "/speak off" => handle.send(SessionCommand::SetSpeakResponses(false))?,
            _ => handle.send(SessionCommand::SendText(line.to_owned()))?,
        }
    }

    handle.send(SessionCommand::Shutdown)?;
    printer.abort();
    Ok(())
}

fn print_blocks(blocks: &[Block]) {
    for block in blocks {
        match block {
            Block::Paragraph(spans) => println!("{}", spans_plain(spans)),
            Block::List(items) => {
                for item in items {
                    println!("  - {}", spans_plain(item));
                }
            }
            Block::Code(code) => {
                let tag = code.language.as_deref().unwrap_or("");
                println!("--- {tag}");
                for line in code.body.lines() {
                    println!("    {line}");
                }
                println!("---");
            }
            Block::Spacer => println!(),
        }
    }
}

fn spans_plain(spans: &[Span]) -> String {
    spans
        .iter()
        .map(|span| match span {
            Span::Text(text) | Span::Bold(text) | Span::Italic(text) => text.clone(),
            Span::Code(code) => format!("`{code}`"),
        })
        .collect()
}

#[cfg(feature = "audio-io")]
fn open_sink() -> Option<Arc<dyn AudioSink>> {
    match colloquy::audio::CpalSink::new() {
        Ok(sink) => Some(Arc::new(sink)),
        Err(e) => {
            tracing::warn!("audio output unavailable, replies stay silent: {e}");
            None
        }
    }
}

#[cfg(not(feature = "audio-io"))]
fn open_sink() -> Option<Arc<dyn AudioSink>> {
    None
}
