//! # Transport seams
//!
//! The engines never touch the network directly. Everything they need from the
//! debate service goes through four traits:
//!
//! - [`LiveTransport`]: open the push channel for a session
//! - [`SnapshotSource`]: fetch the persisted event history
//! - [`CredentialProbe`]: lightweight authenticated read used before opening
//! - [`CredentialRefresher`]: exchange a refresh token for a new access token
//!
//! [`crate::ws::WsTransport`] and [`crate::http::HttpDebateApi`] are the real
//! implementations; tests substitute in-memory fakes.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use roundtable_core::{SessionId, SnapshotRecord};

use crate::credential::Credential;
use crate::errors::{AuthError, Result};

/// Text frames from an open push channel.
///
/// The stream ends when the server closes the channel. An `Err` item means the
/// channel failed; nothing further is read after it.
pub type ChannelStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens the live push channel.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    /// Open a channel for `session`. Resolves once the channel is established.
    async fn open(
        &self,
        session: &SessionId,
        credential: &Credential,
    ) -> Result<ChannelStream>;
}

/// Fetches a session's persisted history.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Every persisted row for `session`, in whatever order storage returns.
    async fn fetch_snapshot(
        &self,
        session: &SessionId,
        credential: &Credential,
    ) -> Result<Vec<SnapshotRecord>>;
}

/// Advisory credential check.
#[async_trait]
pub trait CredentialProbe: Send + Sync {
    /// Issue one authenticated read scoped to `session`.
    async fn probe(&self, session: &SessionId, credential: &Credential) -> Result<()>;
}

/// One-shot credential refresh.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Exchange the refresh token in `credential` for a new credential.
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError>;
}

/// Everything a stream client needs from the outside world.
#[derive(Clone)]
pub struct StreamServices {
    /// Push channel.
    pub live: Arc<dyn LiveTransport>,
    /// Persisted history, used by fallback.
    pub snapshots: Arc<dyn SnapshotSource>,
    /// Pre-open credential probe.
    pub probe: Arc<dyn CredentialProbe>,
    /// Refresh path taken after a probe rejection.
    pub refresher: Arc<dyn CredentialRefresher>,
}

impl StreamServices {
    /// Use one HTTP API object for probe, snapshot and refresh.
    pub fn new<A>(live: Arc<dyn LiveTransport>, api: Arc<A>) -> Self
    where
        A: SnapshotSource + CredentialProbe + CredentialRefresher + 'static,
    {
        Self {
            live,
            snapshots: api.clone(),
            probe: api.clone(),
            refresher: api,
        }
    }
}

impl std::fmt::Debug for StreamServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServices").finish_non_exhaustive()
    }
}
