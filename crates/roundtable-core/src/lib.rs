//! # roundtable-core
//!
//! Canonical event model and the pure halves of the reconciliation engine.
//!
//! - **Model**: [`DebateEvent`], [`Round`], [`EventDetails`]
//! - **Normalizer**: raw payload (or persisted row) → [`DebateEvent`], with
//!   internal phase markers filtered out
//! - **Merger**: three-tier deduplication and sequence-stable ordering via
//!   [`EventLog`]
//! - **Envelope**: push-channel frame decoding into control vs. domain messages
//! - **Logging**: `tracing` subscriber setup shared by binaries

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod event;
pub mod ids;
pub mod logging;
pub mod merge;
pub mod normalize;

pub use envelope::{ControlKind, Inbound, parse_envelope};
pub use errors::{CoreError, Result};
pub use event::{DebateEvent, EventDetails, PdfStatus, Round, Severity, Source};
pub use ids::{EventId, SessionId};
pub use merge::{DuplicateReason, EventLog, MergeOutcome, merge};
pub use normalize::{SnapshotRecord, WireKind, classify, normalize, normalize_record};
