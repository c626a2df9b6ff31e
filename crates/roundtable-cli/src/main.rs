//! # roundtable
//!
//! Follow a debate session from the terminal. Canonical events are written to
//! stdout as JSON lines the first time they appear; logs go to stderr.

#![deny(unsafe_code)]

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use roundtable_core::{EventId, SessionId};
use roundtable_settings::{RoundtableSettings, load_settings, load_settings_from_path};
use roundtable_stream::{
    ConnectionRegistry, Credential, HttpDebateApi, ReplayEngine, StreamClient, StreamConfig,
    StreamServices, StreamView, WsTransport,
};
use tokio::sync::watch;
use tracing::{info, warn};

/// Roundtable debate stream client.
#[derive(Parser, Debug)]
#[command(name = "roundtable", about = "Follow a Roundtable debate session", version)]
struct Cli {
    /// Settings file (defaults to `~/.roundtable/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Access token for the debate service.
    #[arg(long, env = "ROUNDTABLE_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Refresh token, exchanged once if the access token is rejected.
    #[arg(long, env = "ROUNDTABLE_REFRESH_TOKEN", global = true, hide_env_values = true)]
    refresh_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a session live, falling back to its stored history.
    Watch {
        /// Debate session id.
        session: String,
    },
    /// Replay a finished session one event at a time.
    Replay {
        /// Debate session id.
        session: String,

        /// Milliseconds between events (overrides settings).
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

impl Cli {
    fn credential(&self) -> Result<Credential> {
        let token = self
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .context("no access token: pass --token or set ROUNDTABLE_TOKEN")?;
        let credential = Credential::bearer(token);
        Ok(match &self.refresh_token {
            Some(refresh) if !refresh.is_empty() => credential.with_refresh(refresh.clone()),
            _ => credential,
        })
    }

    fn settings(&self) -> Result<RoundtableSettings> {
        match &self.settings {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display())),
            None => load_settings().context("Failed to load settings"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    roundtable_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let credential = cli.credential()?;

    let api = Arc::new(
        HttpDebateApi::new(&settings.api.base_url, settings.api.request_timeout())
            .context("Failed to build HTTP client")?,
    );

    let view = match cli.command {
        Command::Watch { session } => {
            let session = SessionId::from(session);
            info!(session_id = %session, ws_url = %settings.api.ws_url, "watching session");
            let services =
                StreamServices::new(Arc::new(WsTransport::new(&settings.api.ws_url)), api);
            let mut client = StreamClient::new(
                Arc::new(ConnectionRegistry::new()),
                services,
                StreamConfig::from_settings(&settings.stream),
            );
            client.observe(session, Some(credential)).await;
            let view = follow(client.subscribe()).await?;
            client.teardown();
            view
        }
        Command::Replay { session, interval_ms } => {
            let interval = interval_ms
                .map_or_else(|| settings.replay.interval(), Duration::from_millis);
            if interval.is_zero() {
                bail!("replay interval must be greater than zero");
            }
            let session = SessionId::from(session);
            info!(
                session_id = %session,
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                "replaying session"
            );
            let replay = ReplayEngine::new(api, interval).start(session, credential);
            let view = follow(replay.subscribe()).await?;
            replay.stop();
            view
        }
    };

    report(&view)
}

/// Print events until the stream settles, the source goes away or the user
/// interrupts.
async fn follow(mut rx: watch::Receiver<StreamView>) -> Result<StreamView> {
    let mut printer = EventPrinter::default();
    loop {
        let view = rx.borrow_and_update().clone();
        let _ = printer.print_new(&view, &mut std::io::stdout().lock())?;
        if view.status.is_settled() {
            return Ok(view);
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    let last = rx.borrow().clone();
                    let _ = printer.print_new(&last, &mut std::io::stdout().lock())?;
                    return Ok(last);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(view);
            }
        }
    }
}

fn report(view: &StreamView) -> Result<()> {
    let status = &view.status;
    if status.auth_required {
        bail!("the debate service rejected the credential; sign in again");
    }
    if let Some(error) = &status.last_error {
        warn!(error = %error, "stream reported an error");
    }
    info!(
        events = view.events.len(),
        complete = status.is_complete,
        state = %status.state,
        "done"
    );
    Ok(())
}

/// Writes each event once, the first time it shows up in a view.
#[derive(Default)]
struct EventPrinter {
    seen: HashSet<EventId>,
}

impl EventPrinter {
    fn print_new(&mut self, view: &StreamView, out: &mut impl Write) -> Result<usize> {
        let mut printed = 0;
        for event in &view.events {
            if !self.seen.insert(event.id.clone()) {
                continue;
            }
            serde_json::to_writer(&mut *out, event).context("Failed to encode event")?;
            writeln!(out)?;
            printed += 1;
        }
        out.flush()?;
        Ok(printed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
