//! # Replay engine
//!
//! Time-paced reproduction of a finished session. Independent of the
//! registry and the live channel: one snapshot fetch, then one reveal per
//! tick, starting with an immediate reveal of the first event.
//!
//! Consumers see the same [`StreamView`] shape as the live client, so they do
//! not need to know which engine is feeding them.

use std::sync::Arc;
use std::time::Duration;

use roundtable_core::{DebateEvent, EventLog, SessionId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::credential::Credential;
use crate::fallback::FallbackFetcher;
use crate::machine::StreamState;
use crate::transport::SnapshotSource;
use crate::view::StreamView;

// ─────────────────────────────────────────────────────────────────────────────
// Cursor
// ─────────────────────────────────────────────────────────────────────────────

/// Pure reveal cursor over an ordered event list.
#[derive(Clone, Debug, Default)]
pub struct ReplayCursor {
    events: Vec<DebateEvent>,
    revealed: usize,
}

impl ReplayCursor {
    /// Wrap an already ordered list. Duplicates are collapsed.
    pub fn new(events: Vec<DebateEvent>) -> Self {
        let mut log = EventLog::new();
        let _ = log.extend(events);
        Self {
            events: log.events().to_vec(),
            revealed: 0,
        }
    }

    /// Reveal the next event, if any.
    pub fn reveal_next(&mut self) -> Option<&DebateEvent> {
        let event = self.events.get(self.revealed)?;
        self.revealed += 1;
        Some(event)
    }

    /// Events revealed so far, in order.
    pub fn revealed(&self) -> &[DebateEvent] {
        &self.events[..self.revealed]
    }

    /// Total events in the replay.
    pub fn total(&self) -> usize {
        self.events.len()
    }

    /// Every event has been revealed.
    pub fn is_complete(&self) -> bool {
        self.revealed >= self.events.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Starts replays.
#[derive(Clone, Debug)]
pub struct ReplayEngine {
    fetcher: FallbackFetcher,
    interval: Duration,
}

impl ReplayEngine {
    /// Create an engine revealing one event per `interval`.
    pub fn new(source: Arc<dyn SnapshotSource>, interval: Duration) -> Self {
        Self {
            fetcher: FallbackFetcher::new(source),
            interval,
        }
    }

    /// Start replaying `session`. Must be called inside a Tokio runtime.
    pub fn start(&self, session: SessionId, credential: Credential) -> ReplayHandle {
        let (tx, rx) = watch::channel(StreamView::loading());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_replay(
            self.fetcher.clone(),
            session,
            credential,
            self.interval,
            tx,
            cancel.clone(),
        ));
        ReplayHandle { rx, cancel, task }
    }
}

/// A running replay. Dropping it stops the replay.
#[derive(Debug)]
pub struct ReplayHandle {
    rx: watch::Receiver<StreamView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReplayHandle {
    /// Receive every published view.
    pub fn subscribe(&self) -> watch::Receiver<StreamView> {
        self.rx.clone()
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> StreamView {
        self.rx.borrow().clone()
    }

    /// Whether the replay task has exited (completed, failed or stopped).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop revealing.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ReplayHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[instrument(skip_all, fields(session_id = %session))]
async fn run_replay(
    fetcher: FallbackFetcher,
    session: SessionId,
    credential: Credential,
    interval: Duration,
    tx: watch::Sender<StreamView>,
    cancel: CancellationToken,
) {
    let fetched = tokio::select! {
        () = cancel.cancelled() => return,
        r = fetcher.fetch(&session, &credential) => r,
    };
    let events = match fetched {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "replay snapshot fetch failed");
            tx.send_modify(|view| {
                view.status.is_loading = false;
                view.status.last_error = Some(e.to_string());
            });
            return;
        }
    };

    let mut cursor = ReplayCursor::new(events);
    info!(total = cursor.total(), "replay started");
    reveal(&tx, &mut cursor);

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    while !cursor.is_complete() {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(revealed = cursor.revealed().len(), "replay stopped");
                return;
            }
            _ = ticker.tick() => reveal(&tx, &mut cursor),
        }
    }
}

/// Reveal one event (if any) and publish; flags completion once the cursor
/// is exhausted.
fn reveal(tx: &watch::Sender<StreamView>, cursor: &mut ReplayCursor) {
    let next = cursor.reveal_next().cloned();
    let complete = cursor.is_complete();
    if next.is_some() {
        metrics::counter!("replay_events_revealed_total").increment(1);
    }
    tx.send_modify(|view| {
        if let Some(event) = next {
            let _ = view.events.merge(event);
        }
        view.status.is_loading = false;
        if complete && !view.status.is_complete {
            view.status.is_complete = true;
            view.status.state = StreamState::ClosedClean;
        }
    });
    if complete {
        info!(total = cursor.total(), "replay complete");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
