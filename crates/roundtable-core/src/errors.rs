//! Error types for decoding inbound data.

use thiserror::Error;

/// Errors raised while decoding push-channel frames.
///
/// Callers treat these as "malformed message": logged and skipped, never
/// fatal to the channel.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The frame was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame was JSON but not a usable envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Convenience type alias for core results.
pub type Result<T> = std::result::Result<T, CoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
