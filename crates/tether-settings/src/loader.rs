//! Layered settings: compiled defaults, then `~/.tether/settings.json`,
//! then `TETHER_*` environment variables, then range checks.
//!
//! The file layer is overlaid key by key, so a file that only sets
//! `queue.lockPollMs` keeps every other default. Nested objects overlay
//! recursively, anything else (arrays included) replaces, and an explicit
//! `null` leaves the lower layer alone.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tether_core::logging::LogFormat;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

const LOCK_TIMEOUT_RANGE_MS: (u64, u64) = (1, 600_000);
const LOCK_POLL_RANGE_MS: (u64, u64) = (1, 10_000);

/// Root directory for tether state (`~/.tether`).
pub fn tether_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether")
}

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    tether_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file means defaults. A file that is unreadable, not JSON, has
/// mistyped fields, or leaves a queue knob out of range is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let mut merged = serde_json::to_value(TetherSettings::default())?;

    if path.exists() {
        debug!(path = %path.display(), "overlaying settings file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let layer: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        overlay(&mut merged, layer);
    } else {
        debug!(path = %path.display(), "no settings file, using defaults");
    }

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Overlay `layer` onto `base` in place.
pub fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Object(slots), Value::Object(fields)) => {
            for (key, value) in fields {
                match slots.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = slots.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    if let Some(v) = read_env_string("TETHER_QUEUE_DIR") {
        settings.queue.dir = PathBuf::from(v);
    }
    if let Some(v) = read_env_u64(
        "TETHER_LOCK_TIMEOUT_MS",
        LOCK_TIMEOUT_RANGE_MS.0,
        LOCK_TIMEOUT_RANGE_MS.1,
    ) {
        settings.queue.lock_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("TETHER_LOCK_POLL_MS", LOCK_POLL_RANGE_MS.0, LOCK_POLL_RANGE_MS.1)
    {
        settings.queue.lock_poll_ms = v;
    }
    if let Some(v) = read_env_string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("TETHER_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "TETHER_LOG_FORMAT", value = %v, "invalid log format env var, ignoring"),
        }
    }
}

/// Reject values outside the supported ranges.
pub fn validate(settings: &TetherSettings) -> Result<()> {
    let q = &settings.queue;
    check_range("queue.lockTimeoutMs", q.lock_timeout_ms, LOCK_TIMEOUT_RANGE_MS)?;
    check_range("queue.lockPollMs", q.lock_poll_ms, LOCK_POLL_RANGE_MS)?;
    if q.dir.as_os_str().is_empty() {
        return Err(SettingsError::EmptyQueueDir);
    }
    Ok(())
}

fn check_range(field: &'static str, value: u64, (min, max): (u64, u64)) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
