//! Tracing subscriber initialization.
//!
//! Hosts call [`init`] once at startup; tests call [`init_for_tests`] so log
//! output is captured per test. Both are safe to call repeatedly; only the
//! first successful installation wins.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Install JSON logs with timestamps, filtered via `RUST_LOG`.
pub fn init() {
    init_with_default_filter(DEFAULT_FILTER);
}

/// Like [`init`], with a caller-chosen fallback filter (e.g. `"pulse_offline=debug"`).
pub fn init_with_default_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Install a human-readable subscriber writing through the test harness.
///
/// Defaults to `debug` so cache decisions show up in failing test output.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
