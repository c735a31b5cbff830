//! Developer tracing for the loop itself.
//!
//! Tracing goes to stderr and is meant for debugging `codex-loop`. The product
//! output is the run log (`io/run_log`): `RUNLOG.md` plus console notes, which
//! are written regardless of the filter set here.

use std::io::{self, IsTerminal};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Loop-specific filter variable; wins over `RUST_LOG`.
pub const LOG_ENV: &str = "CODEX_LOOP_LOG";

/// Only our own warnings by default; dependency chatter stays off.
const DEFAULT_DIRECTIVE: &str = "off,codex_loop=warn";

/// Install the stderr subscriber.
///
/// ```bash
/// CODEX_LOOP_LOG=codex_loop=debug codex-loop run --iterations 1
/// ```
pub fn init() {
    let directive = filter_directive(
        std::env::var(LOG_ENV).ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal())
                .with_target(false)
                .compact(),
        )
        .init();
}

/// Pick the filter directive: `CODEX_LOOP_LOG`, then `RUST_LOG`, then the default.
///
/// A bare level (`debug`) is scoped to this crate so it does not turn on
/// every dependency's tracing.
fn filter_directive(loop_log: Option<&str>, rust_log: Option<&str>) -> String {
    if let Some(value) = loop_log.map(str::trim).filter(|v| !v.is_empty()) {
        return if is_bare_level(value) {
            format!("off,codex_loop={value}")
        } else {
            value.to_string()
        };
    }
    match rust_log.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value.to_string(),
        None => DEFAULT_DIRECTIVE.to_string(),
    }
}

fn is_bare_level(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error" | "off"
    )
}
