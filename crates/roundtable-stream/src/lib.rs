//! # roundtable-stream
//!
//! Live and replayed debate event streams.
//!
//! - **Registry**: [`ConnectionRegistry`] keeps one live channel per session
//! - **Client**: [`StreamClient`] drives the channel state machine
//!   ([`StreamMachine`]), merging inbound events into a shared [`StreamView`]
//! - **Fallback**: [`FallbackFetcher`] merges persisted history once retries
//!   are exhausted
//! - **Replay**: [`ReplayEngine`] reveals a finished session one event per tick
//! - **Transports**: [`WsTransport`] and [`HttpDebateApi`] behind the traits
//!   in [`transport`]

#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod credential;
mod driver;
pub mod errors;
pub mod fallback;
pub mod http;
pub mod machine;
pub mod registry;
pub mod replay;
pub mod transport;
pub mod view;
pub mod ws;

pub use auth::{CredentialValidator, Validation};
pub use client::{StreamClient, StreamConfig};
pub use credential::Credential;
pub use errors::{AuthError, Result, StreamError};
pub use fallback::{FallbackFetcher, normalize_history};
pub use http::HttpDebateApi;
pub use machine::{StreamInput, StreamMachine, StreamState};
pub use registry::{ChannelHandle, Claim, ConnectionRegistry};
pub use replay::{ReplayCursor, ReplayEngine, ReplayHandle};
pub use transport::{
    ChannelStream, CredentialProbe, CredentialRefresher, LiveTransport, SnapshotSource,
    StreamServices,
};
pub use view::{StreamStatus, StreamView};
pub use ws::WsTransport;
