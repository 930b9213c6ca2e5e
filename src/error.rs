//! Centralized error types for mailpeek.
//!
//! Only conditions that leave nothing to display are errors. Recoverable
//! decoding problems are reported as [`crate::message::Degradation`] values
//! on the fetched message instead.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailpeek library.
#[derive(Error, Debug)]
pub enum MailError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The TCP connection to the server could not be established.
    #[error("Could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: std::io::Error,
    },

    /// TLS setup or handshake failed.
    #[error("TLS error with {host}: {reason}")]
    Tls { host: String, reason: String },

    /// Reading from or writing to an established connection failed.
    #[error("Transport error: {0}")]
    Transport(std::io::Error),

    /// The server rejected the credentials.
    #[error("Authentication failed for '{user}': {reply}")]
    Auth { user: String, reply: String },

    /// The server answered a command with NO/BAD or something unparseable.
    #[error("Server rejected {command}: {reply}")]
    Protocol { command: String, reply: String },

    /// The response stream carried no literal and nothing else usable.
    #[error("No message payload found in server response ({0} bytes received)")]
    NoLiteralFound(usize),

    /// The requested sequence number is outside the mailbox.
    #[error("Message {sequence} does not exist in '{mailbox}' ({exists} messages)")]
    NoSuchMessage {
        sequence: u32,
        mailbox: String,
        exists: u32,
    },

    /// A literal announced more bytes than we are willing to buffer.
    #[error("Literal of {declared} bytes exceeds the configured maximum of {max} bytes")]
    LiteralTooLarge { declared: usize, max: usize },

    /// Credentials could not be resolved from the configured source.
    #[error("Credential lookup failed: {0}")]
    Credentials(String),

    /// Configuration is missing a required value or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The specified file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
}

/// Convenience alias for `Result<T, MailError>`.
pub type Result<T> = std::result::Result<T, MailError>;

impl MailError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Bare `io::Error`s on an open connection are transport failures.
impl From<std::io::Error> for MailError {
    fn from(source: std::io::Error) -> Self {
        Self::Transport(source)
    }
}
