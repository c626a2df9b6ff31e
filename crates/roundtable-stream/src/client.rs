//! # Stream client
//!
//! One [`StreamClient`] per logical consumer. Clients for the same session
//! share a single live channel through the [`ConnectionRegistry`]; each
//! client mirrors that channel's [`StreamView`] into its own watch channel,
//! so subscribers survive session switches.
//!
//! - No credential: the client stays idle and opens nothing.
//! - Credential change on the same session: stored for the next connect or
//!   retry, never a reconnect.
//! - Session change: tear down, then attach to the new session.

use std::sync::Arc;
use std::time::Duration;

use roundtable_core::SessionId;
use roundtable_settings::StreamSettings;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::credential::Credential;
use crate::driver::ChannelDriver;
use crate::machine::StreamState;
use crate::registry::{ChannelHandle, Claim, ConnectionRegistry};
use crate::transport::StreamServices;
use crate::view::StreamView;

/// Retry and teardown timing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Backoff before each reconnect; its length caps the attempts.
    pub retry_delays: Vec<Duration>,
    /// How long a torn-down session refuses re-acquisition.
    pub teardown_guard: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::from_settings(&StreamSettings::default())
    }
}

impl StreamConfig {
    /// Build from the `stream` settings section.
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            retry_delays: settings.retry_delays(),
            teardown_guard: settings.teardown_guard(),
        }
    }
}

struct Attachment {
    handle: Arc<ChannelHandle>,
    forward: CancellationToken,
}

/// A consumer of one session's live event stream.
pub struct StreamClient {
    registry: Arc<ConnectionRegistry>,
    services: StreamServices,
    config: StreamConfig,
    session: Option<SessionId>,
    credential: Option<Credential>,
    attachment: Option<Attachment>,
    view: Arc<watch::Sender<StreamView>>,
}

impl StreamClient {
    /// Create an idle client.
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        services: StreamServices,
        config: StreamConfig,
    ) -> Self {
        let (view, _) = watch::channel(StreamView::default());
        Self {
            registry,
            services,
            config,
            session: None,
            credential: None,
            attachment: None,
            view: Arc::new(view),
        }
    }

    /// Observe `session`.
    ///
    /// Re-observing the current session only updates the credential. A
    /// different session tears the current one down first. Without a
    /// credential nothing is opened until [`Self::update_credential`]
    /// supplies one.
    #[instrument(skip_all, fields(session_id = %session))]
    pub async fn observe(&mut self, session: SessionId, credential: Option<Credential>) {
        if self.session.as_ref() == Some(&session) {
            self.update_credential(credential).await;
            return;
        }

        self.teardown();
        self.session = Some(session);
        self.credential = credential;
        let _ = self.view.send_replace(StreamView::default());
        self.connect().await;
    }

    /// Supply a new credential.
    ///
    /// A live or connecting channel keeps running; the credential is used for
    /// later retries. An idle client connects. A channel that ended in
    /// [`StreamState::AuthRequired`] is retried with the new credential.
    pub async fn update_credential(&mut self, credential: Option<Credential>) {
        let Some(credential) = credential else {
            return;
        };
        let changed = self.credential.as_ref() != Some(&credential);
        self.credential = Some(credential.clone());

        if let Some(attachment) = &self.attachment {
            if attachment.handle.state() == StreamState::AuthRequired && changed {
                info!("retrying after re-authentication");
                self.detach();
                self.connect().await;
            } else if attachment.handle.set_credential(credential) {
                debug!("credential updated without reconnect");
            }
            return;
        }

        if self.session.is_some() {
            self.connect().await;
        }
    }

    /// Receive every published view.
    pub fn subscribe(&self) -> watch::Receiver<StreamView> {
        self.view.subscribe()
    }

    /// Snapshot of the current view.
    pub fn view(&self) -> StreamView {
        self.view.borrow().clone()
    }

    /// Current channel state.
    pub fn state(&self) -> StreamState {
        self.view.borrow().status.state
    }

    /// Session currently observed.
    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    /// Drop the collected events for the observed session.
    pub fn reset(&mut self) {
        if let Some(attachment) = &self.attachment {
            attachment.handle.reset();
        }
        self.view.send_modify(|view| view.events.clear());
    }

    /// Stop observing. The channel closes once no other client uses it.
    pub fn teardown(&mut self) {
        self.detach();
        self.session = None;
    }

    fn detach(&mut self) {
        let Some(attachment) = self.attachment.take() else {
            return;
        };
        attachment.forward.cancel();
        let handle = &attachment.handle;
        if self
            .registry
            .detach(handle.session_id(), handle, self.config.teardown_guard)
        {
            info!(session_id = %handle.session_id(), channel = %handle.id(), "channel torn down");
        }
    }

    async fn connect(&mut self) {
        let (Some(session), Some(credential)) = (self.session.clone(), self.credential.clone())
        else {
            debug!("no credential yet, staying idle");
            return;
        };

        let handle = loop {
            let claim = self.registry.claim(&session, || {
                ChannelHandle::new(session.clone(), credential.clone())
            });
            match claim {
                Claim::Existing(handle) => {
                    debug!(channel = %handle.id(), "reusing live channel");
                    break handle;
                }
                Claim::Created(handle) => {
                    debug!(channel = %handle.id(), "opening new channel");
                    let _ = ChannelDriver::new(
                        handle.clone(),
                        self.registry.clone(),
                        self.services.clone(),
                        self.config.retry_delays.clone(),
                    )
                    .spawn();
                    break handle;
                }
                Claim::Guarded(wait) => {
                    debug!(
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        "session in teardown window, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        };

        self.attach(handle);
    }

    fn attach(&mut self, handle: Arc<ChannelHandle>) {
        let forward = CancellationToken::new();
        let mut rx = handle.subscribe();
        let tx = self.view.clone();
        let token = forward.clone();
        let _ = tx.send_replace(rx.borrow_and_update().clone());

        let _ = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let view = rx.borrow_and_update().clone();
                        let _ = tx.send_replace(view);
                    }
                }
            }
        });

        self.attachment = Some(Attachment { handle, forward });
    }
}

impl Drop for StreamClient {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for StreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamClient")
            .field("session", &self.session)
            .field("state", &self.state())
            .field("attached", &self.attachment.is_some())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
