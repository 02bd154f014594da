//! Error hierarchy for the tether channel.
//!
//! - [`TetherError`]: failures of a queue or channel operation (append, replay,
//!   init). Surfaced to the caller; the operation leaves the queue untouched.
//! - [`DecodeError`]: a single queue line that cannot be turned back into a
//!   record. Local to that line; the line is kept for the next replay.
//! - [`TransportError`]: the external transport refused a forward.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for tether operations.
pub type Result<T> = std::result::Result<T, TetherError>;

/// Failure of a queue or channel operation.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Directory or file creation, read, write or rename failed.
    #[error("queue I/O error on {path}: {source}")]
    Io {
        /// File or directory the operation touched.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The advisory lock could not be acquired within the configured wait.
    #[error("timed out after {waited:?} waiting for queue lock on {path}")]
    LockTimeout {
        /// Queue file the lock guards.
        path: PathBuf,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The lock file could not be opened or locked for a reason other than contention.
    #[error("queue lock error on {path}: {source}")]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Forward to the live peer failed.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// API key cannot be used as a queue file name.
    #[error("invalid api key {0:?}: expected ASCII letters, digits, '-', '_' or '.'")]
    InvalidApiKey(String),

    /// Event name was empty.
    #[error("invalid event name: {0}")]
    InvalidEvent(String),

    /// Record could not be serialized to JSON.
    #[error("failed to encode event record: {0}")]
    Encode(#[from] serde_json::Error),

    /// `send` or `replay_events` was called before `init` completed.
    #[error("channel for api key {0} used before init")]
    NotInitialized(String),
}

impl TetherError {
    /// Build an [`TetherError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::LockTimeout { .. } => "lock_timeout",
            Self::Lock { .. } => "lock",
            Self::Transport(_) => "transport",
            Self::InvalidApiKey(_) => "invalid_api_key",
            Self::InvalidEvent(_) => "invalid_event",
            Self::Encode(_) => "encode",
            Self::NotInitialized(_) => "not_initialized",
        }
    }

    /// Whether the same operation may succeed if attempted again later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::Transport(TransportError::NotConnected(_))
        )
    }
}

/// A queue line that cannot be decoded into an [`EventRecord`](crate::EventRecord).
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Raw line bytes are not UTF-8, so they cannot be base64 text.
    #[error("line is not UTF-8: {0}")]
    Line(#[from] std::str::Utf8Error),

    /// Line is not canonical base64.
    #[error("line is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    /// Decoded bytes are not UTF-8.
    #[error("decoded line is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Decoded text is not JSON.
    #[error("decoded line is not JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON does not have the record shape.
    #[error("record failed validation: {0}")]
    Schema(String),
}

/// Error reported by the external transport when forwarding.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The peer dropped between the state check and the forward.
    #[error("peer {0} is not connected")]
    NotConnected(String),

    /// The transport accepted the call but could not deliver it.
    #[error("send failed: {0}")]
    Send(String),

    /// The transport has shut down.
    #[error("transport closed")]
    Closed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
