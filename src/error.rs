//! Error types for the chatroom
//!
//! Transport errors, registry/command business errors, per-recipient
//! send errors and the top-level application error.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::types::Username;

/// Framed channel errors
///
/// Every variant means the connection is no longer usable, except
/// `FrameTooLarge`, which is raised before anything is written.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// I/O failure on the underlying stream
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer ended the connection
    #[error("connection closed")]
    ConnectionClosed,

    /// Outgoing text does not fit in a single frame
    #[error("frame of {0} bytes exceeds the maximum frame length")]
    FrameTooLarge(usize),

    /// A received frame was not valid UTF-8
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Rendered text too long for one frame
///
/// Raised before anything is queued or written, so the connection is
/// unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("message of {0} bytes does not fit in a frame")]
pub struct OversizedFrame(pub usize);

impl From<OversizedFrame> for ChannelError {
    fn from(err: OversizedFrame) -> Self {
        ChannelError::FrameTooLarge(err.0)
    }
}

/// Connection registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another live peer already holds this username
    #[error("username '{0}' is already taken")]
    NameTaken(Username),

    /// No peer is registered under this username
    #[error("no user with username '{0}'")]
    NotFound(String),
}

/// Command parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// `/whisper` without a target or without a body
    #[error("malformed whisper command")]
    MalformedWhisper,
}

/// Username validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("username cannot be empty")]
    Empty,

    #[error("username cannot contain whitespace")]
    ContainsWhitespace,

    #[error("username cannot start with '/'")]
    CommandPrefix,
}

/// Message send errors
///
/// Per-recipient soft failures. Callers log these and carry on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The peer has been closed or its writer has stopped
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer's outbound queue is full (stalled recipient)
    #[error("Outbound queue full")]
    QueueFull,

    /// The message would not fit in a frame; nothing was queued
    #[error(transparent)]
    Oversized(#[from] OversizedFrame),
}

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Framed channel failure (fatal for that connection)
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The listening socket could not be opened
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listening socket failed; the server stopped accepting
    #[error("failed accepting incoming connection: {0}")]
    Accept(#[source] std::io::Error),
}
