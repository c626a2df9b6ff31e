//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial JSON file only needs to
//! name the fields it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoundtableSettings {
    /// Debate service endpoints.
    pub api: ApiSettings,
    /// Live stream behaviour.
    pub stream: StreamSettings,
    /// Replay pacing.
    pub replay: ReplaySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RoundtableSettings {
    /// Reject values the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.stream.retry_delays_ms.is_empty() {
            return Err(SettingsError::InvalidValue("stream.retryDelaysMs is empty".into()));
        }
        if self.replay.interval_ms == 0 {
            return Err(SettingsError::InvalidValue("replay.intervalMs must be positive".into()));
        }
        Ok(())
    }
}

/// HTTP and push-channel endpoints.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL for the probe, snapshot and refresh endpoints.
    pub base_url: String,
    /// Base URL for the push channel.
    pub ws_url: String,
    /// Per-request timeout for HTTP calls.
    pub request_timeout_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            ws_url: "ws://localhost:8000".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ApiSettings {
    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Live stream retry and teardown behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Delay before each reconnect attempt; its length is the retry cap.
    pub retry_delays_ms: Vec<u64>,
    /// How long a torn-down session refuses re-acquisition.
    pub teardown_guard_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            retry_delays_ms: vec![1000, 2000, 5000],
            teardown_guard_ms: 250,
        }
    }
}

impl StreamSettings {
    /// Retry delays as [`Duration`]s.
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }

    /// Teardown guard window as a [`Duration`].
    pub fn teardown_guard(&self) -> Duration {
        Duration::from_millis(self.teardown_guard_ms)
    }
}

/// Replay engine pacing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplaySettings {
    /// Interval between reveals.
    pub interval_ms: u64,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self { interval_ms: 3000 }
    }
}

impl ReplaySettings {
    /// Reveal interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
