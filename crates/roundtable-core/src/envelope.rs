//! Push-channel envelope parsing.
//!
//! Every frame on the live channel is a JSON object shaped like
//! `{ "type": "...", "payload": {...}, "phase": "..." }`. The envelope `type`
//! is either one of the stream control types or a domain wrapper whose
//! `payload.type` carries the normalizer discriminator.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::{CoreError, Result};

/// Stream-level control messages. Never merged into the event collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlKind {
    /// The server accepted the channel and started streaming.
    StreamStarted,
    /// The server finished streaming this session.
    StreamComplete,
    /// The server reported a stream-level error.
    StreamError,
}

impl ControlKind {
    /// Parse a control type (case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STREAM_STARTED" => Some(Self::StreamStarted),
            "STREAM_COMPLETE" => Some(Self::StreamComplete),
            "STREAM_ERROR" => Some(Self::StreamError),
            _ => None,
        }
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Control message with an optional human-readable message.
    Control {
        /// Which control message.
        kind: ControlKind,
        /// Accompanying message, if any.
        message: Option<String>,
    },
    /// Domain message to be normalized.
    Domain {
        /// Raw payload including its `type` discriminator.
        payload: Value,
        /// Phase tag from the envelope.
        phase: Option<String>,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    phase: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Decode a text frame.
///
/// A domain envelope without a `payload` object is treated as a bare payload:
/// its own fields (including `type`) are normalized directly.
pub fn parse_envelope(text: &str) -> Result<Inbound> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(CoreError::MalformedEnvelope("frame is not a JSON object".into()));
    }
    let envelope: RawEnvelope = serde_json::from_value(value)?;
    let kind = envelope
        .kind
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| CoreError::MalformedEnvelope("missing envelope type".into()))?;

    if let Some(control) = ControlKind::parse(&kind) {
        let message = envelope
            .payload
            .as_ref()
            .and_then(|p| p.get("message").or_else(|| p.get("error")))
            .or_else(|| envelope.rest.get("message"))
            .or_else(|| envelope.rest.get("error"))
            .and_then(Value::as_str)
            .map(str::to_owned);
        return Ok(Inbound::Control { kind: control, message });
    }

    let phase = envelope.phase.filter(|p| !p.is_empty());
    match envelope.payload {
        Some(Value::Object(mut payload)) => {
            if !payload.contains_key("type") {
                let _ = payload.insert("type".into(), Value::String(kind));
            }
            Ok(Inbound::Domain { payload: Value::Object(payload), phase })
        }
        Some(Value::Null) | None => {
            let mut payload = envelope.rest;
            let _ = payload.insert("type".into(), Value::String(kind));
            Ok(Inbound::Domain { payload: Value::Object(payload), phase })
        }
        Some(_) => Err(CoreError::MalformedEnvelope("payload is not an object".into())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
