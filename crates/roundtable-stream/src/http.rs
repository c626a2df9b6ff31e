//! HTTP side of the debate service over `reqwest`: probe, snapshot and
//! credential refresh.

use std::time::Duration;

use async_trait::async_trait;
use roundtable_core::{SessionId, SnapshotRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::credential::Credential;
use crate::errors::{AuthError, Result, StreamError};
use crate::transport::{CredentialProbe, CredentialRefresher, SnapshotSource};

#[derive(Deserialize)]
struct SnapshotResponse {
    #[serde(default)]
    events: Vec<SnapshotRecord>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// REST client for the debate service.
#[derive(Clone, Debug)]
pub struct HttpDebateApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDebateApi {
    /// Create a client for `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    fn session_url(&self, session: &SessionId) -> String {
        format!("{}/api/debates/{}", self.base_url, session)
    }

    async fn get(&self, url: &str, credential: &Credential) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&credential.access_token)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(StreamError::from_status(status.as_u16(), body))
    }
}

#[async_trait]
impl CredentialProbe for HttpDebateApi {
    #[instrument(skip_all, fields(session_id = %session))]
    async fn probe(&self, session: &SessionId, credential: &Credential) -> Result<()> {
        let _ = self.get(&self.session_url(session), credential).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotSource for HttpDebateApi {
    #[instrument(skip_all, fields(session_id = %session))]
    async fn fetch_snapshot(
        &self,
        session: &SessionId,
        credential: &Credential,
    ) -> Result<Vec<SnapshotRecord>> {
        let url = format!("{}/events", self.session_url(session));
        let resp = self.get(&url, credential).await?;
        let bytes = resp.bytes().await?;
        let body: SnapshotResponse = serde_json::from_slice(&bytes)?;
        debug!(count = body.events.len(), "snapshot fetched");
        Ok(body.events)
    }
}

#[async_trait]
impl CredentialRefresher for HttpDebateApi {
    #[instrument(skip_all)]
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(AuthError::NotConfigured)?;

        let resp = self
            .client
            .post(format!("{}/api/auth/refresh", self.base_url))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(AuthError::RefreshRejected {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = resp.bytes().await?;
        let data: RefreshResponse = serde_json::from_slice(&bytes)?;
        debug!("credential refreshed");
        Ok(Credential {
            access_token: data.access_token,
            refresh_token: data.refresh_token.or_else(|| credential.refresh_token.clone()),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
