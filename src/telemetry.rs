//! Telemetry initialization.
//!
//! Controlled by `TASKMERGE_LOG`:
//! - unset → no subscriber (tracing disabled, zero overhead)
//! - `"stderr"` → JSON spans/events to stderr, including span-close events
//!   with their timings
//! - `"pretty"` → compact human-readable events to stderr
//!
//! Filtering follows `RUST_LOG` (default `info`).

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Environment variable selecting the output mode.
pub const LOG_ENV: &str = "TASKMERGE_LOG";

/// Install the global subscriber selected by [`LOG_ENV`].
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init() {
    let mode = std::env::var(LOG_ENV).ok();

    match mode.as_deref() {
        None | Some("") => {}
        Some("stderr") => init_json(),
        Some("pretty") => init_pretty(),
        Some(other) => {
            eprintln!("warning: unknown {LOG_ENV} value {other:?}, expected 'stderr' or 'pretty'");
        }
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_json() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
        )
        .try_init();
}

fn init_pretty() {
    let _ = tracing_subscriber::registry()
        .with(filter())
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}
