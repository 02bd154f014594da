//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file is valid; missing fields get their default value.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::logging::LogFormat;

use crate::loader::tether_home;

/// Root settings type.
///
/// ```json
/// {
///   "queue": { "dir": "/var/lib/tether/api", "lockTimeoutMs": 5000 },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Queue file placement and locking.
    pub queue: QueueSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Queue file placement and lock behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// Directory holding one `<api_key>.eventstream` file per key.
    pub dir: PathBuf,
    /// Maximum wait for the advisory lock before an append or replay fails.
    pub lock_timeout_ms: u64,
    /// Interval between lock attempts while contended.
    pub lock_poll_ms: u64,
}

impl QueueSettings {
    /// Lock wait bound as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Lock poll interval as a [`Duration`].
    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_ms)
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            dir: tether_home().join("api"),
            lock_timeout_ms: 10_000,
            lock_poll_ms: 25,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// stderr output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
