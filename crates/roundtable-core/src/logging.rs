//! Structured logging setup.
//!
//! All crates log through `tracing`. Binaries call [`init_subscriber`] once at
//! startup; `RUST_LOG` overrides the configured level when set.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber writing to stderr.
///
/// Subsequent calls are no-ops.
///
/// # Arguments
///
/// * `level` - Default filter directive, e.g. `"info"` or `"roundtable_stream=debug"`.
/// * `json` - Emit newline-delimited JSON instead of compact text.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    }
}
