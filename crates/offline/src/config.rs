//! Cache configuration and clamping.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Smallest accepted memory budget (5 KiB).
pub const MIN_MEMORY_LIMIT_BYTES: u64 = 5 * 1024;
/// Largest accepted memory budget (300 MiB).
pub const MAX_MEMORY_LIMIT_BYTES: u64 = 300 * 1024 * 1024;
/// Shortest accepted expiry (2 minutes).
pub const MIN_EXPIRY: Duration = Duration::from_secs(2 * 60);
/// Longest accepted expiry (10 days).
pub const MAX_EXPIRY: Duration = Duration::from_secs(10 * 24 * 60 * 60);

pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 30 * 1024 * 1024;
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(2 * 24 * 60 * 60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_DIRECTORY: &str = "pulse-offline";

pub const ENV_DIRECTORY: &str = "PULSE_CACHE_DIR";
pub const ENV_MEMORY_LIMIT_BYTES: &str = "PULSE_CACHE_MEMORY_LIMIT_BYTES";
pub const ENV_EXPIRY_MS: &str = "PULSE_CACHE_EXPIRY_MS";
pub const ENV_MAX_ATTEMPTS: &str = "PULSE_CACHE_MAX_ATTEMPTS";

/// Payload cache configuration.
///
/// Out-of-range values are never rejected: [`CacheConfig::clamped`] pulls
/// them into the supported range, and the cache always stores the clamped form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on the total size of stored records, in bytes.
    pub memory_limit_bytes: u64,
    /// Age after which a payload is no longer retried.
    pub expiry: Duration,
    /// Number of saves after which a payload is no longer retried.
    pub max_attempts: u32,
    /// Record directory for the filesystem adapter.
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            expiry: DEFAULT_EXPIRY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            directory: PathBuf::from(DEFAULT_DIRECTORY),
        }
    }
}

impl CacheConfig {
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Pull every limit into its supported range.
    pub fn clamped(mut self) -> Self {
        self.memory_limit_bytes = self
            .memory_limit_bytes
            .clamp(MIN_MEMORY_LIMIT_BYTES, MAX_MEMORY_LIMIT_BYTES);
        self.expiry = self.expiry.clamp(MIN_EXPIRY, MAX_EXPIRY);
        self.max_attempts = self.max_attempts.max(1);
        self
    }

    /// Load from `PULSE_CACHE_*` environment variables, defaulting anything unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup. Unparsable values are logged
    /// and replaced by the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_DIRECTORY).filter(|v| !v.trim().is_empty()) {
            config.directory = PathBuf::from(dir);
        }
        if let Some(bytes) = parse_var::<u64>(&lookup, ENV_MEMORY_LIMIT_BYTES) {
            config.memory_limit_bytes = bytes;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_EXPIRY_MS) {
            config.expiry = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_MAX_ATTEMPTS) {
            config.max_attempts = attempts;
        }

        config
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(variable = name, value = %raw, error = %e, "ignoring invalid cache setting; using default");
            None
        }
    }
}
