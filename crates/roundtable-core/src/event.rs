//! Canonical debate event model.
//!
//! Every engine converges on [`DebateEvent`]: the live stream, the snapshot
//! fallback and the replay engine all produce the same shape, so consumers
//! never need to know which one is active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EventId;

/// Coarse grouping of an event, independent of its raw wire type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Round {
    /// Knights gathering sources.
    Research,
    /// Opening positions.
    Position,
    /// One knight challenging another.
    Challenge,
    /// Responses to challenges.
    Rebuttal,
    /// Adversarial review of the emerging answer.
    RedTeam,
    /// Movement towards agreement.
    Convergence,
    /// Translated output.
    Translator,
    /// Generated artifacts (documents, PDFs).
    Artifact,
    /// Moderator ruling and session close.
    Closed,
    /// Wire type the normalizer does not recognise.
    Unknown,
}

impl Round {
    /// Wire name of the round.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Position => "position",
            Self::Challenge => "challenge",
            Self::Rebuttal => "rebuttal",
            Self::RedTeam => "red_team",
            Self::Convergence => "convergence",
            Self::Translator => "translator",
            Self::Artifact => "artifact",
            Self::Closed => "closed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Red-team finding severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic.
    Low,
    /// Worth addressing.
    Medium,
    /// Undermines the conclusion.
    High,
    /// Invalidates the conclusion.
    Critical,
}

impl Severity {
    /// Lenient, case-insensitive parse. Unrecognised values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" | "major" => Some(Self::High),
            "critical" | "severe" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Progress of PDF generation for an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfStatus {
    /// Requested but not started.
    Pending,
    /// Rendering in progress.
    Generating,
    /// Available at the artifact locator.
    Ready,
    /// Rendering failed.
    Failed,
}

impl PdfStatus {
    /// Lenient, case-insensitive parse. Unrecognised values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Some(Self::Pending),
            "generating" | "in_progress" | "running" => Some(Self::Generating),
            "ready" | "complete" | "completed" | "done" => Some(Self::Ready),
            "failed" | "error" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A research source cited by a knight.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Link to the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Round-specific payload carried alongside the common fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    /// Sources gathered during research.
    Research {
        /// Cited sources, in source order.
        sources: Vec<Source>,
    },
    /// A knight's stated position.
    Position {
        /// Short stance label, when the orchestrator provides one.
        stance: Option<String>,
    },
    /// A challenge against another knight.
    Challenge {
        /// The critique text.
        critique: Option<String>,
    },
    /// A rebuttal to an earlier challenge.
    Rebuttal {
        /// What the rebuttal answers.
        addresses: Option<String>,
    },
    /// Red-team findings.
    RedTeam {
        /// Flaw descriptions.
        flaws: Vec<String>,
        /// Overall severity.
        severity: Option<Severity>,
    },
    /// Convergence progress.
    Convergence {
        /// Agreement score, when reported.
        agreement: Option<f64>,
    },
    /// Translated output.
    Translation {
        /// Target language.
        language: Option<String>,
        /// Translated text.
        translated_content: Option<String>,
    },
    /// A generated artifact.
    Artifact {
        /// Where the artifact can be fetched.
        locator: Option<String>,
        /// PDF rendering status.
        pdf_status: Option<PdfStatus>,
    },
    /// The moderator's ruling.
    Ruling {
        /// Ruling text.
        ruling: Option<String>,
    },
}

/// The canonical unit of the debate timeline.
///
/// Created by the normalizer and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebateEvent {
    /// Stable identity; `seq-<n>` when the source supplied a sequence number.
    pub id: EventId,
    /// Source sequence number, the primary ordering key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<u64>,
    /// Coarse category.
    pub round: Round,
    /// Orchestrator phase label. Display grouping only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Acting participant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knight: Option<String>,
    /// Participant being addressed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_knight: Option<String>,
    /// One-line summary.
    pub headline: String,
    /// Longer human-readable text.
    pub detail: String,
    /// Reported confidence, `0.0` when absent.
    pub confidence: f64,
    /// Client-observed receipt time.
    pub timestamp: DateTime<Utc>,
    /// Round-specific extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<EventDetails>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
