//! Tracing/logging setup shared by SDK hosts and tests.

/// Subscriber construction (filters, formats).
pub mod subscriber;

pub use subscriber::{DEFAULT_FILTER, init, init_for_tests, init_with_default_filter};
