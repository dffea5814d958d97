//! Tracing subscriber setup.
//!
//! Diagnostics go to stderr so they never interleave with the progress
//! lines the run prints on stdout. `RUST_LOG` overrides the default
//! `lipbatch=info` filter; `RUST_LOG_FORMAT=json` switches to line-JSON
//! output for log collectors.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "lipbatch=info";

fn json_requested() -> bool {
    std::env::var("RUST_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"))
}

/// Install the global subscriber. Idempotent; later calls are no-ops.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if json_requested() {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
