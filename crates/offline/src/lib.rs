//! Offline payload cache: the durable, bounded retry queue for telemetry.
//!
//! ## Design
//!
//! - One durable record per payload, keyed by its id
//! - Total record bytes bounded by a memory limit; eviction runs after every save
//! - Payloads past their attempt ceiling or their expiry are never retried,
//!   but stay visible to eviction
//! - Retry priority: Analytics > Error > WCD, oldest first
//! - Eviction priority: corrupt, exhausted, expired, then oldest Analytics,
//!   WCD and finally Error
//!
//! ## Components
//!
//! - `Payload`: one retryable unit that encodes itself to a durable record
//! - `PayloadCache`: bounded collection with pick-next and eviction
//! - `PayloadStorage`: blob persistence seam (`FsStorage`, `InMemoryStorage`)
//! - `retry`: single-step delivery driver for an external sender
//! - `legacy`: migration of the older newline-delimited request buffer

pub mod cache;
pub mod config;
pub mod error;
pub mod legacy;
pub mod payload;
pub mod retry;
pub mod storage;

pub use cache::{CacheStats, PayloadCache};
pub use config::CacheConfig;
pub use error::{CacheError, PayloadError};
pub use legacy::{LegacyError, MigrationReport, migrate_legacy_requests};
pub use payload::Payload;
pub use retry::{PayloadSender, RetryOutcome, SendError};
pub use storage::{FsStorage, InMemoryStorage, PayloadStorage, StorageError};
