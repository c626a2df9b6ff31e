//! Credential validation before a channel is opened.
//!
//! The probe is advisory: only an authorization rejection changes the
//! outcome. Rejection gets exactly one refresh attempt. Every other probe
//! failure lets the caller proceed, since opening the channel is the
//! authoritative check.

use std::sync::Arc;

use roundtable_core::SessionId;
use tracing::{debug, info, instrument, warn};

use crate::credential::Credential;
use crate::transport::{CredentialProbe, CredentialRefresher};

/// Result of validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Validation {
    /// Open the channel with this credential (possibly refreshed).
    Proceed(Credential),
    /// The credential was rejected and could not be refreshed.
    AuthRequired,
}

/// Probe, then refresh once on rejection.
pub struct CredentialValidator {
    probe: Arc<dyn CredentialProbe>,
    refresher: Arc<dyn CredentialRefresher>,
}

impl CredentialValidator {
    /// Create a validator.
    pub fn new(probe: Arc<dyn CredentialProbe>, refresher: Arc<dyn CredentialRefresher>) -> Self {
        Self { probe, refresher }
    }

    /// Validate `credential` for `session`.
    #[instrument(skip_all, fields(session_id = %session))]
    pub async fn validate(&self, session: &SessionId, credential: Credential) -> Validation {
        match self.probe.probe(session, &credential).await {
            Ok(()) => {
                debug!("credential probe accepted");
                Validation::Proceed(credential)
            }
            Err(e) if e.is_auth_rejection() => {
                info!("credential probe rejected, refreshing");
                match self.refresher.refresh(&credential).await {
                    Ok(refreshed) => Validation::Proceed(refreshed),
                    Err(err) => {
                        warn!(error = %err, "credential refresh failed");
                        Validation::AuthRequired
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "credential probe failed, proceeding");
                Validation::Proceed(credential)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
