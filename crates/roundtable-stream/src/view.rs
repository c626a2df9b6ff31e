//! Consumer-facing view shared by the stream client and the replay engine.

use roundtable_core::EventLog;
use serde::Serialize;

use crate::machine::StreamState;

/// Status flags published alongside the event collection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    /// No more events will arrive (clean close, fallback fetched, replay done).
    pub is_complete: bool,
    /// Waiting for the first data or for the fallback history.
    pub is_loading: bool,
    /// A live channel is currently established.
    pub connection_healthy: bool,
    /// The credential was rejected and the stream was abandoned.
    pub auth_required: bool,
    /// Current channel lifecycle state.
    pub state: StreamState,
    /// Last error reported by the server or a transport.
    pub last_error: Option<String>,
}

impl StreamStatus {
    /// Nothing further will change without caller action: the stream
    /// completed, needs a new credential, or ended in a terminal state with
    /// no fetch outstanding.
    pub fn is_settled(&self) -> bool {
        self.is_complete || self.auth_required || (self.state.is_terminal() && !self.is_loading)
    }
}

/// An ordered, append-growing event collection plus its status.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StreamView {
    /// Canonical events in order.
    pub events: EventLog,
    /// Status flags.
    pub status: StreamStatus,
}

impl StreamView {
    /// A view that is waiting for its first data.
    pub fn loading() -> Self {
        Self {
            events: EventLog::new(),
            status: StreamStatus {
                is_loading: true,
                ..StreamStatus::default()
            },
        }
    }
}
