//! Engine-level behaviour against in-memory transports.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use roundtable_core::{Round, SessionId, SnapshotRecord};
use roundtable_stream::{
    AuthError, ChannelStream, ConnectionRegistry, Credential, CredentialProbe,
    CredentialRefresher, LiveTransport, ReplayEngine, SnapshotSource, StreamClient, StreamConfig,
    StreamError, StreamServices, StreamState, StreamView,
};
use serde_json::json;
use tokio::sync::{Notify, mpsc};

const WAIT: Duration = Duration::from_secs(120);

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

/// What the next `open` does.
enum Script {
    /// Handshake fails with a transient network error.
    Fail,
    /// Handshake refused with this HTTP status.
    FailWith(u16),
    /// Handshake stalls until the gate opens, then rejects the credential.
    RejectAfter(Arc<Notify>),
    /// Deliver frames then close.
    Deliver(Vec<String>),
}

type FrameTx = mpsc::UnboundedSender<Result<String, StreamError>>;

struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scripted live transport. Once the script runs out, channels stay open
/// until the test pushes frames or the client tears them down.
#[derive(Default)]
struct FakeLive {
    script: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
    open_now: Arc<AtomicUsize>,
    max_open: AtomicUsize,
    held: Mutex<Vec<FrameTx>>,
    tokens: Mutex<Vec<String>>,
}

impl FakeLive {
    fn scripted(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    fn push(&self, frame: &str) {
        if let Some(tx) = self.held.lock().last() {
            let _ = tx.send(Ok(frame.to_owned()));
        }
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveTransport for FakeLive {
    async fn open(&self, _: &SessionId, credential: &Credential) -> Result<ChannelStream, StreamError> {
        self.tokens.lock().push(credential.access_token.clone());
        let step = self.script.lock().pop_front();
        match &step {
            Some(Script::Fail) => return Err(StreamError::WebSocket("connection refused".into())),
            Some(Script::FailWith(status)) => return Err(StreamError::from_status(*status, "refused")),
            Some(Script::RejectAfter(gate)) => {
                gate.notified().await;
                return Err(StreamError::Unauthorized { status: 401 });
            }
            _ => {}
        }

        let _ = self.opens.fetch_add(1, Ordering::SeqCst);
        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.max_open.fetch_max(now, Ordering::SeqCst);
        let guard = OpenGuard(self.open_now.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        match step {
            Some(Script::Deliver(frames)) => {
                for f in frames {
                    let _ = tx.send(Ok(f));
                }
            }
            _ => self.held.lock().push(tx),
        }

        Ok(Box::pin(futures::stream::poll_fn(move |cx| {
            let _alive = &guard;
            rx.poll_recv(cx)
        })))
    }
}

#[derive(Clone, Copy)]
enum Probe {
    Accept,
    Reject,
}

struct FakeApi {
    probe: Probe,
    probe_gate: Option<Arc<Notify>>,
    refresh_ok: bool,
    rows: Vec<SnapshotRecord>,
    snapshot_calls: AtomicUsize,
}

impl FakeApi {
    fn new(rows: Vec<SnapshotRecord>) -> Self {
        Self {
            probe: Probe::Accept,
            probe_gate: None,
            refresh_ok: false,
            rows,
            snapshot_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SnapshotSource for FakeApi {
    async fn fetch_snapshot(&self, _: &SessionId, _: &Credential) -> Result<Vec<SnapshotRecord>, StreamError> {
        let _ = self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.clone())
    }
}

#[async_trait]
impl CredentialProbe for FakeApi {
    async fn probe(&self, _: &SessionId, _: &Credential) -> Result<(), StreamError> {
        if let Some(gate) = &self.probe_gate {
            gate.notified().await;
        }
        match self.probe {
            Probe::Accept => Ok(()),
            Probe::Reject => Err(StreamError::Unauthorized { status: 401 }),
        }
    }
}

#[async_trait]
impl CredentialRefresher for FakeApi {
    async fn refresh(&self, _: &Credential) -> Result<Credential, AuthError> {
        if self.refresh_ok {
            Ok(Credential::bearer("refreshed"))
        } else {
            Err(AuthError::RefreshRejected {
                status: 401,
                message: "expired".into(),
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn frame(seq: u64) -> String {
    json!({
        "type": "debate_event",
        "phase": "position",
        "payload": {
            "type": "POSITION",
            "sequence_id": seq,
            "knight_id": format!("k{seq}"),
            "headline": format!("headline {seq}"),
            "summary": format!("summary {seq}"),
        }
    })
    .to_string()
}

fn row(seq: u64) -> SnapshotRecord {
    SnapshotRecord {
        id: Some(format!("row-{seq}")),
        sequence_id: Some(seq),
        phase: Some("position".into()),
        event_type: "POSITION".into(),
        payload: json!({
            "knight_id": format!("k{seq}"),
            "headline": format!("headline {seq}"),
            "summary": format!("summary {seq}"),
        }),
        created_at: None,
    }
}

fn client(live: &Arc<FakeLive>, api: &Arc<FakeApi>, registry: &Arc<ConnectionRegistry>) -> StreamClient {
    StreamClient::new(
        registry.clone(),
        StreamServices::new(live.clone(), api.clone()),
        StreamConfig::default(),
    )
}

async fn wait_until<F>(client: &StreamClient, mut pred: F) -> StreamView
where
    F: FnMut(&StreamView) -> bool,
{
    let mut rx = client.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|v| pred(v)))
        .await
        .expect("condition not reached")
        .expect("view channel closed")
        .clone()
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn seqs(view: &StreamView) -> Vec<u64> {
    view.events.iter().filter_map(|e| e.sequence_id).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fallback_fills_gaps_without_duplicates() {
    let live = Arc::new(FakeLive::scripted(vec![
        Script::Deliver(vec![frame(1), frame(3), frame(5)]),
        Script::Fail,
        Script::Fail,
        Script::Fail,
    ]));
    let api = Arc::new(FakeApi::new((1..=5).map(row).collect()));
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    c.observe("s1".into(), Some(Credential::bearer("tok"))).await;
    let view = wait_until(&c, |v| v.status.is_complete).await;

    assert_eq!(seqs(&view), vec![1, 2, 3, 4, 5]);
    assert_eq!(view.events.len(), 5);
    assert_eq!(view.status.state, StreamState::Fallback);
    assert!(!view.status.is_loading);
    assert_eq!(api.snapshot_calls.load(Ordering::SeqCst), 1);
    assert_eq!(live.tokens.lock().len(), 4);
    assert_eq!(registry.live_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn retries_follow_backoff_schedule() {
    let live = Arc::new(FakeLive::scripted(vec![
        Script::Fail,
        Script::Fail,
        Script::Fail,
        Script::Fail,
    ]));
    let api = Arc::new(FakeApi::new(Vec::new()));
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    let started = tokio::time::Instant::now();
    c.observe("s1".into(), Some(Credential::bearer("tok"))).await;
    let view = wait_until(&c, |v| v.status.is_complete).await;

    // 1s + 2s + 5s of backoff before falling back.
    assert_eq!(started.elapsed(), Duration::from_secs(8));
    assert_eq!(view.status.state, StreamState::Fallback);
    assert!(view.events.is_empty());
}

#[tokio::test(start_paused = true)]
async fn permanent_handshake_failure_skips_backoff() {
    let live = Arc::new(FakeLive::scripted(vec![Script::FailWith(404)]));
    let api = Arc::new(FakeApi::new((1..=2).map(row).collect()));
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    let started = tokio::time::Instant::now();
    c.observe("s1".into(), Some(Credential::bearer("tok"))).await;
    let view = wait_until(&c, |v| v.status.is_complete).await;

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(view.status.state, StreamState::Fallback);
    assert_eq!(seqs(&view), vec![1, 2]);
    assert_eq!(live.tokens.lock().len(), 1);
    assert_eq!(api.snapshot_calls.load(Ordering::SeqCst), 1);
    assert_eq!(registry.live_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn server_error_handshake_still_backs_off() {
    let live = Arc::new(FakeLive::scripted(vec![Script::FailWith(503)]));
    let api = Arc::new(FakeApi::new(Vec::new()));
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    let started = tokio::time::Instant::now();
    c.observe("s1".into(), Some(Credential::bearer("tok"))).await;
    let _ = wait_until(&c, |v| v.status.state == StreamState::Open).await;

    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(live.tokens.lock().len(), 2);
    assert_eq!(api.snapshot_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn credential_updated_while_validating_is_not_overwritten() {
    let gate = Arc::new(Notify::new());
    let live = Arc::new(FakeLive::default());
    let api = Arc::new(FakeApi {
        probe: Probe::Reject,
        probe_gate: Some(gate.clone()),
        refresh_ok: true,
        ..FakeApi::new(Vec::new())
    });
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    c.observe("s1".into(), Some(Credential::bearer("old").with_refresh("r"))).await;
    let _ = wait_until(&c, |v| v.status.state == StreamState::Validating).await;
    c.update_credential(Some(Credential::bearer("new"))).await;
    gate.notify_one();

    let view = wait_until(&c, |v| v.status.state == StreamState::Open).await;
    assert!(!view.status.auth_required);
    assert_eq!(live.tokens.lock().as_slice(), ["new".to_owned()]);
    assert_eq!(live.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn credential_updated_while_connecting_reopens_instead_of_auth_required() {
    let gate = Arc::new(Notify::new());
    let live = Arc::new(FakeLive::scripted(vec![Script::RejectAfter(gate.clone())]));
    let api = Arc::new(FakeApi::new(Vec::new()));
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    c.observe("s1".into(), Some(Credential::bearer("old"))).await;
    let _ = wait_until(&c, |v| v.status.state == StreamState::Connecting).await;
    c.update_credential(Some(Credential::bearer("new"))).await;
    assert_eq!(registry.live_channels(), 1);
    gate.notify_one();

    let view = wait_until(&c, |v| v.status.state == StreamState::Open).await;
    assert!(!view.status.auth_required);
    assert_eq!(
        live.tokens.lock().as_slice(),
        ["old".to_owned(), "new".to_owned()]
    );
    assert_eq!(live.opens(), 1);
    assert_eq!(registry.live_channels(), 1);
}

#[tokio::test(start_paused = true)]
async fn credential_churn_never_reconnects() {
    let live = Arc::new(FakeLive::default());
    let api = Arc::new(FakeApi::new(Vec::new()));
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    c.observe("s1".into(), Some(Credential::bearer("tok-0"))).await;
    let _ = wait_until(&c, |v| v.status.state == StreamState::Open).await;

    for i in 1..=25 {
        c.update_credential(Some(Credential::bearer(format!("tok-{i}")))).await;
        c.observe("s1".into(), Some(Credential::bearer(format!("tok-{i}b")))).await;
    }
    settle().await;

    assert_eq!(live.opens(), 1);
    assert_eq!(c.state(), StreamState::Open);
    assert_eq!(registry.live_channels(), 1);
    assert_eq!(live.open_now.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rapid_mount_churn_keeps_one_channel() {
    let live = Arc::new(FakeLive::default());
    let api = Arc::new(FakeApi::new(Vec::new()));
    let registry = Arc::new(ConnectionRegistry::new());

    for _ in 0..20 {
        let mut a = client(&live, &api, &registry);
        let mut b = client(&live, &api, &registry);
        a.observe("s1".into(), Some(Credential::bearer("tok"))).await;
        b.observe("s1".into(), Some(Credential::bearer("tok"))).await;
        settle().await;
        assert!(registry.live_channels() <= 1);
        a.teardown();
        drop(b);
    }
    settle().await;

    assert_eq!(live.max_open.load(Ordering::SeqCst), 1);
    assert_eq!(live.open_now.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn session_switch_reopens() {
    let live = Arc::new(FakeLive::default());
    let api = Arc::new(FakeApi::new(Vec::new()));
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    c.observe("s1".into(), Some(Credential::bearer("tok"))).await;
    let _ = wait_until(&c, |v| v.status.state == StreamState::Open).await;
    c.observe("s2".into(), Some(Credential::bearer("tok"))).await;
    let _ = wait_until(&c, |v| v.status.state == StreamState::Open).await;
    settle().await;

    assert_eq!(live.opens(), 2);
    assert_eq!(live.open_now.load(Ordering::SeqCst), 1);
    assert_eq!(c.session().map(SessionId::as_str), Some("s2"));
}

#[tokio::test(start_paused = true)]
async fn rejected_credential_requires_auth_without_opening() {
    let live = Arc::new(FakeLive::default());
    let api = Arc::new(FakeApi {
        probe: Probe::Reject,
        ..FakeApi::new(Vec::new())
    });
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    c.observe("s1".into(), Some(Credential::bearer("stale").with_refresh("r"))).await;
    let view = wait_until(&c, |v| v.status.auth_required).await;

    assert_eq!(view.status.state, StreamState::AuthRequired);
    assert!(!view.status.is_loading);
    assert!(live.tokens.lock().is_empty());
    assert_eq!(registry.live_channels(), 0);
}

#[tokio::test(start_paused = true)]
async fn refreshed_credential_is_used_to_open() {
    let live = Arc::new(FakeLive::default());
    let api = Arc::new(FakeApi {
        probe: Probe::Reject,
        refresh_ok: true,
        ..FakeApi::new(Vec::new())
    });
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    c.observe("s1".into(), Some(Credential::bearer("stale").with_refresh("r"))).await;
    let _ = wait_until(&c, |v| v.status.state == StreamState::Open).await;
    assert_eq!(live.tokens.lock().as_slice(), ["refreshed".to_owned()]);
}

#[tokio::test(start_paused = true)]
async fn unknown_types_tolerated_and_markers_filtered() {
    let live = Arc::new(FakeLive::default());
    let api = Arc::new(FakeApi::new(Vec::new()));
    let registry = Arc::new(ConnectionRegistry::new());
    let mut c = client(&live, &api, &registry);

    c.observe("s1".into(), Some(Credential::bearer("tok"))).await;
    let _ = wait_until(&c, |v| v.status.state == StreamState::Open).await;

    live.push(r#"{"type":"debate_event","payload":{"type":"PHASE_STARTED","phase":"research"}}"#);
    live.push(r#"{"type":"debate_event","payload":{"type":"FOO_BAR","summary":"hi"}}"#);
    live.push(r#"{"type":"debate_event","payload":{"type":"PHASE_COMPLETE","phase":"research"}}"#);
    live.push(r#"{"type":"STREAM_ERROR","payload":{"message":"slow judge"}}"#);
    live.push(r#"{"type":"STREAM_COMPLETE"}"#);

    let view = wait_until(&c, |v| v.status.is_complete).await;
    assert_eq!(view.events.len(), 1);
    let event = &view.events.events()[0];
    assert_eq!(event.round, Round::Unknown);
    assert_eq!(event.headline, "Event: FOO BAR");
    assert_eq!(event.detail, "hi");
    assert_eq!(view.status.last_error.as_deref(), Some("slow judge"));
    assert_eq!(view.status.state, StreamState::ClosedClean);
}

#[tokio::test(start_paused = true)]
async fn replay_reveals_in_persisted_order() {
    let rows = vec![row(3), row(1), row(4), row(2)];
    let api = Arc::new(FakeApi::new(rows));
    let engine = ReplayEngine::new(api, Duration::from_secs(3));
    let handle = engine.start("s1".into(), Credential::bearer("tok"));
    settle().await;

    let mut completions = 0;
    let mut seen = Vec::new();
    for tick in 0..6 {
        let view = handle.view();
        seen.push(view.events.len());
        if view.status.is_complete && completions == 0 {
            completions += 1;
            assert_eq!(tick, 3, "completion flagged before the last reveal");
        }
        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
    }

    assert_eq!(seen, vec![1, 2, 3, 4, 4, 4]);
    assert_eq!(completions, 1);
    assert_eq!(seqs(&handle.view()), vec![1, 2, 3, 4]);
}
