//! Channel driver: the task that runs one live channel end to end.
//!
//! Validate → connect → pump frames → (retry with backoff)* → clean close or
//! snapshot fallback. Every state change is published through the channel's
//! [`ChannelHandle`]; the driver exits as soon as the handle is cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use roundtable_core::{ControlKind, Inbound, MergeOutcome, normalize, parse_envelope};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::auth::{CredentialValidator, Validation};
use crate::errors::StreamError;
use crate::fallback::FallbackFetcher;
use crate::machine::{StreamInput, StreamMachine};
use crate::registry::{ChannelHandle, ConnectionRegistry};
use crate::transport::{ChannelStream, StreamServices};

/// How a connected channel stopped.
enum ChannelEnd {
    /// Completion control message received.
    Completed,
    /// Teardown requested.
    Cancelled,
    /// Server closed the channel or the transport failed.
    Closed(Option<StreamError>),
}

pub(crate) struct ChannelDriver {
    handle: Arc<ChannelHandle>,
    registry: Arc<ConnectionRegistry>,
    services: StreamServices,
    retry_delays: Vec<Duration>,
}

impl ChannelDriver {
    pub(crate) fn new(
        handle: Arc<ChannelHandle>,
        registry: Arc<ConnectionRegistry>,
        services: StreamServices,
        retry_delays: Vec<Duration>,
    ) -> Self {
        Self {
            handle,
            registry,
            services,
            retry_delays,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[instrument(skip_all, fields(session_id = %self.handle.session_id(), channel = %self.handle.id()))]
    async fn run(self) {
        let cancel = self.handle.cancel_token();
        let max_retries = u32::try_from(self.retry_delays.len()).unwrap_or(u32::MAX);
        let mut machine = StreamMachine::new(max_retries);
        self.step(&mut machine, StreamInput::CredentialAvailable);

        let validator = CredentialValidator::new(
            self.services.probe.clone(),
            self.services.refresher.clone(),
        );
        loop {
            let candidate = self.handle.credential();
            let validation = tokio::select! {
                () = cancel.cancelled() => return,
                v = validator.validate(self.handle.session_id(), candidate.clone()) => v,
            };
            match validation {
                Validation::Proceed(validated) => {
                    // A credential supplied mid-probe wins over the probed one.
                    let _ = self.handle.swap_credential(&candidate, validated);
                    self.step(&mut machine, StreamInput::Validated);
                    break;
                }
                Validation::AuthRequired if self.handle.credential() != candidate => {
                    debug!("credential replaced during validation, validating again");
                }
                Validation::AuthRequired => {
                    self.auth_required(&mut machine);
                    return;
                }
            }
        }

        loop {
            let credential = self.handle.credential();
            let opened = tokio::select! {
                () = cancel.cancelled() => return,
                r = self.services.live.open(self.handle.session_id(), &credential) => r,
            };

            let failure = match opened {
                Ok(channel) => {
                    metrics::counter!("stream_connections_opened_total").increment(1);
                    self.step(&mut machine, StreamInput::Opened);
                    self.handle.update_status(|s| {
                        s.connection_healthy = true;
                        s.last_error = None;
                    });

                    match self.pump(channel, &cancel).await {
                        ChannelEnd::Completed => {
                            self.step(&mut machine, StreamInput::Completed);
                            self.handle.update_status(|s| {
                                s.is_complete = true;
                                s.is_loading = false;
                                s.connection_healthy = false;
                            });
                            self.release();
                            info!("stream completed");
                            return;
                        }
                        ChannelEnd::Cancelled => return,
                        ChannelEnd::Closed(reason) => {
                            warn!(error = ?reason, "channel closed before completion");
                            self.handle.update_status(|s| s.connection_healthy = false);
                            reason
                        }
                    }
                }
                Err(e) if e.is_auth_rejection() && self.handle.credential() != credential => {
                    debug!(error = %e, "credential replaced during handshake, reopening");
                    continue;
                }
                Err(e) if e.is_auth_rejection() => {
                    warn!(error = %e, "channel open rejected credential");
                    self.auth_required(&mut machine);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, category = e.category(), "channel open failed");
                    Some(e)
                }
            };

            let permanent = failure.as_ref().is_some_and(|e| !e.is_retryable());
            if let Some(e) = &failure {
                self.handle.update_status(|s| s.last_error = Some(e.to_string()));
            }
            self.step(&mut machine, StreamInput::Failed);

            if permanent {
                info!("failure is not retryable, skipping backoff");
                self.step(&mut machine, StreamInput::GiveUp);
            } else if let Some(delay) = machine.next_delay(&self.retry_delays) {
                metrics::counter!("stream_retries_total").increment(1);
                info!(
                    attempt = machine.attempts() + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnecting after backoff"
                );
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                self.step(&mut machine, StreamInput::Retry);
                continue;
            } else {
                self.step(&mut machine, StreamInput::Retry);
            }

            self.fall_back(&machine, &cancel).await;
            return;
        }
    }

    async fn fall_back(&self, machine: &StreamMachine, cancel: &CancellationToken) {
        metrics::counter!("stream_fallbacks_total").increment(1);
        warn!(attempts = machine.attempts(), "live channel abandoned, falling back to snapshot");
        self.release();
        self.handle.update_status(|s| s.is_loading = true);
        let fetcher = FallbackFetcher::new(self.services.snapshots.clone());
        tokio::select! {
            () = cancel.cancelled() => {}
            _ = fetcher.run(&self.handle) => {}
        }
    }

    fn step(&self, machine: &mut StreamMachine, input: StreamInput) {
        match machine.apply(input) {
            Some(state) => {
                debug!(state = %state, "stream state");
                self.handle.set_state(state);
            }
            None => trace!(state = %machine.state(), ?input, "input ignored"),
        }
    }

    fn auth_required(&self, machine: &mut StreamMachine) {
        self.step(machine, StreamInput::AuthRejected);
        self.handle.update_status(|s| {
            s.auth_required = true;
            s.is_loading = false;
            s.connection_healthy = false;
        });
        self.release();
    }

    fn release(&self) {
        self.registry
            .release_channel(self.handle.session_id(), self.handle.id());
    }

    async fn pump(&self, mut channel: ChannelStream, cancel: &CancellationToken) -> ChannelEnd {
        loop {
            let frame = tokio::select! {
                biased;
                () = cancel.cancelled() => return ChannelEnd::Cancelled,
                f = channel.next() => f,
            };
            match frame {
                None => return ChannelEnd::Closed(None),
                Some(Err(e)) => return ChannelEnd::Closed(Some(e)),
                Some(Ok(text)) => {
                    if self.handle_frame(&text) {
                        return ChannelEnd::Completed;
                    }
                }
            }
        }
    }

    /// Apply one text frame. Returns `true` on stream completion.
    fn handle_frame(&self, text: &str) -> bool {
        let inbound = match parse_envelope(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                metrics::counter!("stream_malformed_messages_total").increment(1);
                warn!(error = %e, "skipping malformed frame");
                return false;
            }
        };

        match inbound {
            Inbound::Control { kind: ControlKind::StreamStarted, .. } => {
                self.handle.update_status(|s| s.connection_healthy = true);
                false
            }
            Inbound::Control { kind: ControlKind::StreamComplete, .. } => true,
            Inbound::Control { kind: ControlKind::StreamError, message } => {
                let message = message.unwrap_or_else(|| "stream error".to_owned());
                warn!(error = %message, "server reported stream error");
                self.handle.update_status(|s| s.last_error = Some(message));
                false
            }
            Inbound::Domain { payload, phase } => {
                let Some(event) = normalize(&payload, phase.as_deref()) else {
                    trace!("internal marker filtered");
                    return false;
                };
                if let MergeOutcome::Duplicate(reason) = self.handle.merge(event) {
                    metrics::counter!("stream_duplicates_dropped_total").increment(1);
                    debug!(?reason, "duplicate event dropped");
                }
                false
            }
        }
    }
}
