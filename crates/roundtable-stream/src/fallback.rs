//! Snapshot fallback.
//!
//! Once live retries are exhausted (or the channel failed permanently), the
//! persisted history is fetched and merged into whatever the live channel
//! already delivered. A failed fetch leaves the collection untouched.

use std::sync::Arc;

use roundtable_core::{DebateEvent, SessionId, SnapshotRecord, normalize_record};
use tracing::{info, instrument, warn};

use crate::credential::Credential;
use crate::errors::Result;
use crate::registry::ChannelHandle;
use crate::transport::SnapshotSource;

/// Fetches and normalizes a session's persisted history.
#[derive(Clone)]
pub struct FallbackFetcher {
    source: Arc<dyn SnapshotSource>,
}

impl FallbackFetcher {
    /// Create a fetcher over `source`.
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self { source }
    }

    /// Fetch, order and normalize the full history. Internal phase markers
    /// are dropped.
    pub async fn fetch(
        &self,
        session: &SessionId,
        credential: &Credential,
    ) -> Result<Vec<DebateEvent>> {
        let records = self.source.fetch_snapshot(session, credential).await?;
        Ok(normalize_history(records))
    }

    /// Merge the history into `handle`'s collection and mark it complete.
    ///
    /// Returns how many events were new. On fetch failure the collection is
    /// unchanged, loading stops, and the error is recorded.
    #[instrument(skip_all, fields(session_id = %handle.session_id()))]
    pub async fn run(&self, handle: &ChannelHandle) -> usize {
        let credential = handle.credential();
        match self.fetch(handle.session_id(), &credential).await {
            Ok(events) => {
                let fetched = events.len();
                let inserted = handle.merge_all(events);
                info!(fetched, inserted, "snapshot fallback merged");
                handle.update_status(|status| {
                    status.is_complete = true;
                    status.is_loading = false;
                });
                inserted
            }
            Err(e) => {
                warn!(error = %e, "snapshot fallback failed");
                handle.update_status(|status| {
                    status.is_loading = false;
                    status.last_error = Some(e.to_string());
                });
                0
            }
        }
    }
}

impl std::fmt::Debug for FallbackFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackFetcher").finish_non_exhaustive()
    }
}

/// Sort rows by `sequence_id` (unsequenced rows last, in storage order) and
/// normalize them.
pub fn normalize_history(mut records: Vec<SnapshotRecord>) -> Vec<DebateEvent> {
    records.sort_by_key(|r| r.sequence_id.unwrap_or(u64::MAX));
    records.iter().filter_map(normalize_record).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
