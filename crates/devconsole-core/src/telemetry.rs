//! Tracing setup for the devconsole binary.
//!
//! Filter directives come from `DEVCONSOLE_LOG`, then `RUST_LOG`, then the
//! level passed by the caller. Only the first [`init_tracing`] call in a
//! process installs a subscriber.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter directives read before `RUST_LOG`.
pub const LOG_ENV: &str = "DEVCONSOLE_LOG";

/// Install the global subscriber, writing to stderr.
///
/// With `json` every event is a JSON line, which keeps `--json` command
/// output on stdout machine readable.
pub fn init_tracing(json: bool, level: Level) {
    let directives = std::env::var(LOG_ENV)
        .or_else(|_| std::env::var(EnvFilter::DEFAULT_ENV))
        .ok();
    let filter = build_filter(directives.as_deref(), level);

    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Parse `directives`, falling back to `level` when absent or invalid.
fn build_filter(directives: Option<&str>, level: Level) -> EnvFilter {
    directives
        .filter(|d| !d.trim().is_empty())
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_str()))
}
