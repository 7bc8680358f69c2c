//! Error types for the colloquy client.

/// Top-level error type for the voice chat client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Generation backend request or stream transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// Speech synthesis request error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Speech recognition error.
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// A host capability (recognizer, audio output) is not available.
    #[error("capability missing: {0}")]
    CapabilityMissing(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ClientError>;
