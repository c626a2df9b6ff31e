//! # Connection registry
//!
//! Process-wide map of session id → live channel. Opening a channel can start
//! an expensive server-side debate job, so two channels for the same session
//! must never be open at once, no matter how quickly consumers come and go.
//!
//! Every read-check-write goes through a single `DashMap` entry, which holds
//! the shard lock for the whole step. A torn-down session leaves a short
//! guard behind; claims during the guard window are told to wait instead of
//! racing a fresh open against the stale close.
//!
//! The registry is an ordinary value: construct one per process and share it
//! by `Arc` with every [`crate::StreamClient`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use roundtable_core::{DebateEvent, MergeOutcome, SessionId};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::credential::Credential;
use crate::machine::StreamState;
use crate::view::{StreamStatus, StreamView};

// ─────────────────────────────────────────────────────────────────────────────
// ChannelHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state of one live channel.
///
/// The channel driver writes into it; every attached consumer reads the
/// published [`StreamView`].
pub struct ChannelHandle {
    id: Uuid,
    session_id: SessionId,
    cancel: CancellationToken,
    view: watch::Sender<StreamView>,
    credential: RwLock<Credential>,
    consumers: AtomicUsize,
}

impl ChannelHandle {
    /// A fresh handle with no consumers, in [`StreamState::Idle`].
    pub fn new(session_id: SessionId, credential: Credential) -> Self {
        let (view, _) = watch::channel(StreamView::loading());
        Self {
            id: Uuid::now_v7(),
            session_id,
            cancel: CancellationToken::new(),
            view,
            credential: RwLock::new(credential),
            consumers: AtomicUsize::new(0),
        }
    }

    /// Unique channel id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Session this channel streams.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.view.borrow().status.state
    }

    /// Not cancelled and not in a terminal state.
    pub fn is_healthy(&self) -> bool {
        !self.cancel.is_cancelled() && !self.state().is_terminal()
    }

    /// Whether the channel has been torn down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of attached consumers.
    pub fn consumers(&self) -> usize {
        self.consumers.load(Ordering::SeqCst)
    }

    /// Receive every published view.
    pub fn subscribe(&self) -> watch::Receiver<StreamView> {
        self.view.subscribe()
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> StreamView {
        self.view.borrow().clone()
    }

    /// Credential used for the next connect attempt.
    pub fn credential(&self) -> Credential {
        self.credential.read().clone()
    }

    /// Replace the stored credential. Never reconnects; the new value is
    /// picked up by the next connect or retry.
    pub fn set_credential(&self, credential: Credential) -> bool {
        let mut slot = self.credential.write();
        if *slot == credential {
            return false;
        }
        *slot = credential;
        true
    }

    /// Store `credential` only if the current one is still `expected`. A value
    /// supplied by the caller in between is kept.
    pub(crate) fn swap_credential(&self, expected: &Credential, credential: Credential) -> bool {
        let mut slot = self.credential.write();
        if *slot != *expected || *slot == credential {
            return false;
        }
        *slot = credential;
        true
    }

    /// Drop the collected events. Only called on explicit caller reset.
    pub fn reset(&self) {
        self.view.send_modify(|view| view.events.clear());
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn set_state(&self, state: StreamState) {
        let _ = self.view.send_if_modified(|view| {
            let changed = view.status.state != state;
            view.status.state = state;
            changed
        });
    }

    pub(crate) fn update_status<F>(&self, update: F)
    where
        F: FnOnce(&mut StreamStatus),
    {
        let _ = self.view.send_if_modified(|view| {
            let before = view.status.clone();
            update(&mut view.status);
            view.status != before
        });
    }

    /// Merge one event; subscribers are only woken when it was new.
    pub(crate) fn merge(&self, event: DebateEvent) -> MergeOutcome {
        let mut outcome = MergeOutcome::Inserted;
        let _ = self.view.send_if_modified(|view| {
            outcome = view.events.merge(event);
            if outcome.is_inserted() {
                view.status.is_loading = false;
            }
            outcome.is_inserted()
        });
        outcome
    }

    /// Merge a batch in order; returns how many were new.
    pub(crate) fn merge_all(&self, events: Vec<DebateEvent>) -> usize {
        let mut inserted = 0;
        let _ = self.view.send_if_modified(|view| {
            inserted = view.events.extend(events);
            inserted > 0
        });
        inserted
    }

    fn attach(&self) {
        let _ = self.consumers.fetch_add(1, Ordering::SeqCst);
    }

    fn detach(&self) -> usize {
        let current = self.consumers.load(Ordering::SeqCst);
        let remaining = current.saturating_sub(1);
        self.consumers.store(remaining, Ordering::SeqCst);
        remaining
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("consumers", &self.consumers())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

enum Slot {
    Active(Arc<ChannelHandle>),
    Guarded(Instant),
}

/// Outcome of [`ConnectionRegistry::claim`].
#[derive(Debug)]
pub enum Claim {
    /// A healthy channel already exists; it is now attached to the caller.
    Existing(Arc<ChannelHandle>),
    /// A new handle was registered and attached; the caller must start it.
    Created(Arc<ChannelHandle>),
    /// The session was just torn down; try again after this long.
    Guarded(Duration),
}

/// Session id → live channel.
#[derive(Default)]
pub struct ConnectionRegistry {
    slots: DashMap<SessionId, Slot>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered handle for `session` if it is healthy.
    ///
    /// A stale handle (cancelled or terminal) is discarded.
    pub fn acquire(&self, session: &SessionId) -> Option<Arc<ChannelHandle>> {
        let Entry::Occupied(entry) = self.slots.entry(session.clone()) else {
            return None;
        };
        let healthy = match entry.get() {
            Slot::Active(handle) if handle.is_healthy() => Some(handle.clone()),
            Slot::Active(_) => None,
            Slot::Guarded(_) => return None,
        };
        if healthy.is_none() {
            debug!(session_id = %session, "discarding stale channel handle");
            let _ = entry.remove();
        }
        healthy
    }

    /// Register `handle` for `session`, replacing whatever was there.
    pub fn register(&self, session: &SessionId, handle: Arc<ChannelHandle>) {
        let previous = self.slots.insert(session.clone(), Slot::Active(handle));
        if let Some(Slot::Active(old)) = previous {
            if old.is_healthy() {
                warn!(session_id = %session, channel = %old.id(), "replacing a healthy channel handle");
            }
        }
    }

    /// Forget `session`. Idempotent.
    pub fn release(&self, session: &SessionId) {
        if self.slots.remove(session).is_some() {
            debug!(session_id = %session, "registry entry released");
        }
    }

    /// Atomically reuse a healthy handle or register a new one built by
    /// `make`. The caller is attached as a consumer either way.
    pub fn claim<F>(&self, session: &SessionId, make: F) -> Claim
    where
        F: FnOnce() -> ChannelHandle,
    {
        let now = Instant::now();
        match self.slots.entry(session.clone()) {
            Entry::Occupied(mut entry) => {
                let reuse = match entry.get() {
                    Slot::Active(handle) if handle.is_healthy() => Some(Ok(handle.clone())),
                    Slot::Guarded(until) if *until > now => Some(Err(*until - now)),
                    _ => None,
                };
                match reuse {
                    Some(Ok(handle)) => {
                        handle.attach();
                        Claim::Existing(handle)
                    }
                    Some(Err(remaining)) => Claim::Guarded(remaining),
                    None => {
                        let handle = Arc::new(make());
                        handle.attach();
                        let _ = entry.insert(Slot::Active(handle.clone()));
                        Claim::Created(handle)
                    }
                }
            }
            Entry::Vacant(entry) => {
                let handle = Arc::new(make());
                handle.attach();
                let _ = entry.insert(Slot::Active(handle.clone()));
                Claim::Created(handle)
            }
        }
    }

    /// Detach one consumer. When it was the last one, the channel is cancelled
    /// and `session` is guarded for `guard`. Returns whether the channel was
    /// closed.
    pub fn detach(&self, session: &SessionId, handle: &ChannelHandle, guard: Duration) -> bool {
        match self.slots.entry(session.clone()) {
            Entry::Occupied(mut entry) => {
                if handle.detach() > 0 {
                    return false;
                }
                handle.cancel.cancel();
                let ours = match entry.get() {
                    Slot::Active(current) => current.id() == handle.id(),
                    Slot::Guarded(_) => true,
                };
                if ours {
                    if guard.is_zero() {
                        let _ = entry.remove();
                    } else {
                        let _ = entry.insert(Slot::Guarded(Instant::now() + guard));
                    }
                }
                true
            }
            Entry::Vacant(entry) => {
                if handle.detach() > 0 {
                    return false;
                }
                handle.cancel.cancel();
                if !guard.is_zero() {
                    let _ = entry.insert(Slot::Guarded(Instant::now() + guard));
                }
                true
            }
        }
    }

    /// Release `session` only if it still points at channel `id`.
    pub(crate) fn release_channel(&self, session: &SessionId, id: Uuid) {
        let removed = self
            .slots
            .remove_if(session, |_, slot| matches!(slot, Slot::Active(h) if h.id() == id));
        if removed.is_some() {
            debug!(session_id = %session, channel = %id, "registry entry released");
        }
    }

    /// Remaining guard time for `session`, if any.
    pub fn guard_remaining(&self, session: &SessionId) -> Option<Duration> {
        let now = Instant::now();
        match self.slots.get(session).as_deref() {
            Some(Slot::Guarded(until)) if *until > now => Some(*until - now),
            _ => None,
        }
    }

    /// Number of sessions with a registered, healthy channel.
    pub fn live_channels(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Active(h) if h.is_healthy()))
            .count()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("slots", &self.slots.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
