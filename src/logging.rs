//! Diagnostic logging to stderr
//!
//! Controlled by `FORGE_LOG` using `tracing-subscriber` filter syntax, e.g.
//! `FORGE_LOG=forge_agent=debug`. Quiet (`warn`) by default so the
//! interactive session output stays readable.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "FORGE_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Install the global subscriber. Safe to call more than once.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
