//! # roundtable-settings
//!
//! Layered configuration for the stream and replay engines.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RoundtableSettings::default()`]
//! 2. **User file**: `~/.roundtable/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ROUNDTABLE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, overlay_json, settings_path};
pub use types::{ApiSettings, LoggingSettings, ReplaySettings, RoundtableSettings, StreamSettings};
