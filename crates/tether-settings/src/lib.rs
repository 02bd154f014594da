//! # tether-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, overlay, settings_path, tether_home};
pub use types::{LoggingSettings, QueueSettings, TetherSettings};
