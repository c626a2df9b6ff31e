//! Settings loading: defaults, then the JSON file, then `ROUNDTABLE_*` env vars.
//!
//! Loading flow:
//! 1. Start with compiled [`RoundtableSettings::default()`]
//! 2. If `~/.roundtable/settings.json` exists, overlay its values on the defaults
//! 3. Apply `ROUNDTABLE_*` environment variable overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RoundtableSettings;

/// Resolve the path to the settings file (`~/.roundtable/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".roundtable").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RoundtableSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RoundtableSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

/// Defaults overlaid with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<RoundtableSettings> {
    let mut merged = serde_json::to_value(RoundtableSettings::default())?;
    if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        overlay_json(&mut merged, serde_json::from_str(&content)?);
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    Ok(serde_json::from_value(merged)?)
}

/// Lay `layer` over `base` in place.
///
/// Where both sides hold an object the keys are overlaid one level down;
/// anywhere else the layer's value wins outright. A `null` in the layer
/// leaves the base value alone, so a settings file can blank a key without
/// erasing its default.
pub fn overlay_json(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Object(slots), Value::Object(entries)) => {
            for (key, value) in entries {
                match slots.get_mut(&key) {
                    Some(slot) => overlay_json(slot, value),
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

/// Apply environment overrides read through `lookup`.
///
/// Invalid values are logged and ignored, falling back to file/default.
pub fn apply_env_overrides<F>(settings: &mut RoundtableSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("ROUNDTABLE_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = env.string("ROUNDTABLE_WS_URL") {
        settings.api.ws_url = v;
    }
    if let Some(v) = env.u64("ROUNDTABLE_REQUEST_TIMEOUT_MS", 100, 600_000) {
        settings.api.request_timeout_ms = v;
    }
    if let Some(v) = env.u64("ROUNDTABLE_REPLAY_INTERVAL_MS", 10, 600_000) {
        settings.replay.interval_ms = v;
    }
    if let Some(v) = env.u64("ROUNDTABLE_TEARDOWN_GUARD_MS", 0, 60_000) {
        settings.stream.teardown_guard_ms = v;
    }
    if let Some(v) = env.string("ROUNDTABLE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("ROUNDTABLE_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
