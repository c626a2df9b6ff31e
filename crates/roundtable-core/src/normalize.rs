//! Raw payload → [`DebateEvent`] normalization.
//!
//! The orchestrator emits loosely-typed JSON objects discriminated by a
//! `type` string. [`classify`] maps that string onto a closed [`WireKind`]
//! and [`normalize`] builds the canonical event from it. The normalizer never
//! fails: unknown types degrade to a generic headline, and the only payloads
//! that produce no event are the internal phase markers.
//!
//! Payloads with neither a `sequence_id` nor an `id` get a content hash of
//! type, knight, headline and detail as their id. Two such payloads with the
//! same text therefore share an id and collapse into one event on merge, even
//! if they were emitted separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::event::{DebateEvent, EventDetails, PdfStatus, Round, Severity, Source};
use crate::ids::EventId;

/// Closed set of recognised wire types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireKind {
    /// Research results.
    Research,
    /// Opening position.
    Position,
    /// Challenge between knights.
    Challenge,
    /// Rebuttal.
    Rebuttal,
    /// Red-team finding.
    RedTeam,
    /// Convergence update.
    Convergence,
    /// Translator output.
    Translation,
    /// Artifact created.
    Artifact,
    /// PDF generation progress for an artifact.
    Pdf(PdfStatus),
    /// Moderator ruling. Always closes the debate.
    ModeratorRuling,
    /// Debate closed without a ruling payload.
    DebateClosed,
    /// `PHASE_STARTED` / `PHASE_COMPLETE` progress markers.
    PhaseMarker,
    /// Anything else; carries the original type string.
    Unknown(String),
}

impl WireKind {
    /// Round this wire type belongs to. `None` for phase markers.
    pub fn round(&self) -> Option<Round> {
        Some(match self {
            Self::Research => Round::Research,
            Self::Position => Round::Position,
            Self::Challenge => Round::Challenge,
            Self::Rebuttal => Round::Rebuttal,
            Self::RedTeam => Round::RedTeam,
            Self::Convergence => Round::Convergence,
            Self::Translation => Round::Translator,
            Self::Artifact | Self::Pdf(_) => Round::Artifact,
            Self::ModeratorRuling | Self::DebateClosed => Round::Closed,
            Self::Unknown(_) => Round::Unknown,
            Self::PhaseMarker => return None,
        })
    }
}

/// Map a raw `type` discriminator (case-insensitive) to a [`WireKind`].
pub fn classify(raw_type: &str) -> WireKind {
    match raw_type.trim().to_ascii_uppercase().as_str() {
        "RESEARCH" | "RESEARCH_COMPLETE" | "RESEARCH_RESULT" => WireKind::Research,
        "POSITION" | "POSITION_TAKEN" | "OPENING_STATEMENT" => WireKind::Position,
        "CHALLENGE" | "CHALLENGE_ISSUED" => WireKind::Challenge,
        "REBUTTAL" => WireKind::Rebuttal,
        "RED_TEAM" | "RED_TEAM_ATTACK" | "RED_TEAM_FINDING" => WireKind::RedTeam,
        "CONVERGENCE" | "CONSENSUS_UPDATE" => WireKind::Convergence,
        "TRANSLATION" | "TRANSLATOR_OUTPUT" => WireKind::Translation,
        "ARTIFACT_READY" | "ARTIFACT_CREATED" => WireKind::Artifact,
        "PDF_GENERATING" => WireKind::Pdf(PdfStatus::Generating),
        "PDF_READY" => WireKind::Pdf(PdfStatus::Ready),
        "PDF_FAILED" => WireKind::Pdf(PdfStatus::Failed),
        "MODERATOR_RULING" => WireKind::ModeratorRuling,
        "DEBATE_CLOSED" => WireKind::DebateClosed,
        "PHASE_STARTED" | "PHASE_COMPLETE" => WireKind::PhaseMarker,
        _ => WireKind::Unknown(raw_type.trim().to_owned()),
    }
}

/// Normalize a raw payload, stamping it with the current time.
///
/// Returns `None` only for internal phase markers.
pub fn normalize(payload: &Value, phase: Option<&str>) -> Option<DebateEvent> {
    normalize_at(payload, phase, Utc::now())
}

/// Normalize a raw payload with an explicit receipt time.
pub fn normalize_at(
    payload: &Value,
    phase: Option<&str>,
    received_at: DateTime<Utc>,
) -> Option<DebateEvent> {
    let empty = Map::new();
    let fields = payload.as_object().unwrap_or(&empty);
    let raw_type = str_field(fields, &["type"]).unwrap_or_default();
    let kind = classify(&raw_type);
    let round = kind.round()?;
    if let WireKind::Unknown(raw) = &kind {
        debug!(raw_type = %raw, "unrecognised event type");
    }

    let sequence_id = fields
        .get("sequence_id")
        .or_else(|| fields.get("sequenceId"))
        .and_then(as_sequence);

    let phase = if kind == WireKind::ModeratorRuling {
        Some("closed".to_owned())
    } else {
        phase
            .map(str::to_owned)
            .filter(|p| !p.is_empty())
            .or_else(|| str_field(fields, &["phase"]))
    };

    let knight = str_field(fields, &["knight", "knight_id", "speaker"]);
    let target_knight = str_field(fields, &["target_knight", "targetKnight", "target"]);
    let headline = headline_for(&kind, fields, knight.as_deref(), target_knight.as_deref());
    let detail = detail_for(&kind, fields);
    let confidence = fields.get("confidence").and_then(as_f64).unwrap_or(0.0);

    let id = match sequence_id {
        Some(seq) => EventId::from_sequence(seq),
        None => str_field(fields, &["id", "event_id"])
            .map_or_else(|| content_id(&raw_type, knight.as_deref(), &headline, &detail), EventId::from),
    };

    Some(DebateEvent {
        id,
        sequence_id,
        round,
        phase,
        knight,
        target_knight,
        headline,
        detail,
        confidence,
        timestamp: received_at,
        details: details_for(&kind, fields),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Persisted rows
// ─────────────────────────────────────────────────────────────────────────────

/// One row of a persisted session history.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Storage id of the row.
    #[serde(default)]
    pub id: Option<String>,
    /// Source sequence number.
    #[serde(default)]
    pub sequence_id: Option<u64>,
    /// Phase label at persistence time.
    #[serde(default)]
    pub phase: Option<String>,
    /// Wire type of the stored event.
    #[serde(default)]
    pub event_type: String,
    /// Stored payload.
    #[serde(default)]
    pub payload: Value,
    /// Storage timestamp (informational).
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Normalize a persisted row.
///
/// Row-level `event_type`, `sequence_id` and `id` fill in whatever the stored
/// payload leaves out, so a row and its live counterpart normalize to the same
/// identity.
pub fn normalize_record(record: &SnapshotRecord) -> Option<DebateEvent> {
    normalize_record_at(record, Utc::now())
}

/// [`normalize_record`] with an explicit receipt time.
pub fn normalize_record_at(
    record: &SnapshotRecord,
    received_at: DateTime<Utc>,
) -> Option<DebateEvent> {
    let mut fields = record.payload.as_object().cloned().unwrap_or_default();
    if str_field(&fields, &["type"]).is_none() {
        let _ = fields.insert("type".into(), Value::String(record.event_type.clone()));
    }
    if let Some(seq) = record.sequence_id {
        let _ = fields.entry("sequence_id").or_insert(Value::from(seq));
    }
    if let Some(id) = &record.id {
        let _ = fields.entry("id").or_insert(Value::String(id.clone()));
    }
    normalize_at(&Value::Object(fields), record.phase.as_deref(), received_at)
}

// ─────────────────────────────────────────────────────────────────────────────
// Field helpers
// ─────────────────────────────────────────────────────────────────────────────

/// First non-empty string among `keys`.
fn str_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match fields.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_owned()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn as_sequence(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => str_field(obj, &["description", "flaw", "text", "title"]),
            _ => None,
        })
        .collect()
}

fn sources(value: Option<&Value>) -> Vec<Source> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => {
                Some(Source { title: None, url: Some(s.clone()) })
            }
            Value::String(s) => Some(Source { title: Some(s.clone()), url: None }),
            Value::Object(obj) => {
                let source = Source {
                    title: str_field(obj, &["title", "name"]),
                    url: str_field(obj, &["url", "link"]),
                };
                (source.title.is_some() || source.url.is_some()).then_some(source)
            }
            _ => None,
        })
        .collect()
}

fn headline_for(
    kind: &WireKind,
    fields: &Map<String, Value>,
    knight: Option<&str>,
    target: Option<&str>,
) -> String {
    if let WireKind::Unknown(raw) = kind {
        return format!("Event: {}", raw.to_ascii_uppercase().replace('_', " "));
    }
    if let Some(headline) = str_field(fields, &["headline", "title"]) {
        return headline;
    }
    let who = knight.unwrap_or("A knight");
    match kind {
        WireKind::Research => format!("{who} completed research"),
        WireKind::Position => format!("{who} takes a position"),
        WireKind::Challenge => match target {
            Some(t) => format!("{who} challenges {t}"),
            None => format!("{who} issues a challenge"),
        },
        WireKind::Rebuttal => match target {
            Some(t) => format!("{who} rebuts {t}"),
            None => format!("{who} responds"),
        },
        WireKind::RedTeam => "Red team review".to_owned(),
        WireKind::Convergence => "Convergence update".to_owned(),
        WireKind::Translation => "Translation ready".to_owned(),
        WireKind::Artifact => "Artifact ready".to_owned(),
        WireKind::Pdf(PdfStatus::Ready) => "PDF ready".to_owned(),
        WireKind::Pdf(PdfStatus::Failed) => "PDF generation failed".to_owned(),
        WireKind::Pdf(_) => "Generating PDF".to_owned(),
        WireKind::ModeratorRuling => "Moderator ruling".to_owned(),
        WireKind::DebateClosed => "Debate closed".to_owned(),
        WireKind::PhaseMarker | WireKind::Unknown(_) => String::new(),
    }
}

const COMMON_DETAIL_KEYS: &[&str] = &["summary", "detail", "message", "body", "content", "text"];

fn detail_for(kind: &WireKind, fields: &Map<String, Value>) -> String {
    let specific: &[&str] = match kind {
        // Unknown payloads only ever surface their prose fields.
        WireKind::Unknown(_) => return str_field(fields, &["summary", "message", "body"]).unwrap_or_default(),
        WireKind::Position => &["position", "argument"],
        WireKind::Challenge => &["critique", "challenge"],
        WireKind::Rebuttal => &["rebuttal", "response"],
        WireKind::Convergence => &["consensus"],
        WireKind::Translation => &["translated_content"],
        WireKind::ModeratorRuling => &["ruling", "verdict"],
        _ => &[],
    };
    str_field(fields, COMMON_DETAIL_KEYS)
        .or_else(|| str_field(fields, specific))
        .unwrap_or_default()
}

fn details_for(kind: &WireKind, fields: &Map<String, Value>) -> Option<EventDetails> {
    Some(match kind {
        WireKind::Research => EventDetails::Research {
            sources: sources(fields.get("sources")),
        },
        WireKind::Position => EventDetails::Position {
            stance: str_field(fields, &["stance", "position"]),
        },
        WireKind::Challenge => EventDetails::Challenge {
            critique: str_field(fields, &["critique", "challenge"]),
        },
        WireKind::Rebuttal => EventDetails::Rebuttal {
            addresses: str_field(fields, &["addresses", "in_response_to"]),
        },
        WireKind::RedTeam => EventDetails::RedTeam {
            flaws: string_list(fields.get("flaws")),
            severity: str_field(fields, &["severity"]).as_deref().and_then(Severity::parse),
        },
        WireKind::Convergence => EventDetails::Convergence {
            agreement: fields
                .get("agreement")
                .or_else(|| fields.get("agreement_score"))
                .and_then(as_f64),
        },
        WireKind::Translation => EventDetails::Translation {
            language: str_field(fields, &["language", "target_language"]),
            translated_content: str_field(fields, &["translated_content", "translation"]),
        },
        WireKind::Artifact | WireKind::Pdf(_) => EventDetails::Artifact {
            locator: str_field(fields, &["artifact_url", "url", "artifact_path", "path"]),
            pdf_status: match kind {
                WireKind::Pdf(status) => Some(*status),
                _ => str_field(fields, &["pdf_status"]).as_deref().and_then(PdfStatus::parse),
            },
        },
        WireKind::ModeratorRuling => EventDetails::Ruling {
            ruling: str_field(fields, &["ruling", "verdict"]),
        },
        WireKind::DebateClosed | WireKind::PhaseMarker | WireKind::Unknown(_) => return None,
    })
}

/// Deterministic identity for payloads carrying neither a sequence nor an id.
/// Timestamp, confidence and structured details are not hashed.
fn content_id(raw_type: &str, knight: Option<&str>, headline: &str, detail: &str) -> EventId {
    let mut hasher = Sha256::new();
    for part in [raw_type, knight.unwrap_or_default(), headline, detail] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
    EventId::from_string(format!("evt-{hex}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
