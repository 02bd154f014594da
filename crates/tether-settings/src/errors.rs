//! Why a tether settings file was refused.

use std::path::PathBuf;

use thiserror::Error;

/// A settings layer that could not be turned into usable [`crate::TetherSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read tether settings at {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not JSON.
    #[error("tether settings at {} are not valid JSON: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Parser failure, with line and column.
        source: serde_json::Error,
    },
    /// The merged settings have a field of the wrong type, e.g. a string lock timeout.
    #[error("tether settings do not fit the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A queue timing knob is outside what the lock loop accepts.
    #[error("{field} is {value} ms, expected {min}..={max} ms")]
    OutOfRange {
        /// Dotted camelCase path of the field, as written in the file.
        field: &'static str,
        /// Value after all layers were applied.
        value: u64,
        /// Smallest accepted value.
        min: u64,
        /// Largest accepted value.
        max: u64,
    },
    /// `queue.dir` resolved to an empty path, so no queue file could be named.
    #[error("queue.dir is empty; event queues need a directory")]
    EmptyQueueDir,
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
