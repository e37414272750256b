//! Durable blob storage boundary for payload records.
//!
//! The cache never touches files directly; it goes through [`PayloadStorage`],
//! keyed by payload id. Adapters decide where bytes live.

pub mod fs;
pub mod in_memory;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub use fs::FsStorage;
pub use in_memory::InMemoryStorage;

/// Keyed blob storage used by the payload cache.
///
/// Contract:
/// - `write` is atomic: a reader sees either the previous record or the new
///   one, never a partial write.
/// - `remove` of an absent key is not an error (returns `false`).
/// - `keys` returns every stored record key in ascending order.
pub trait PayloadStorage: Send + Sync {
    /// Atomically replace the record stored under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Read a record. `None` when absent.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Check whether a record exists.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Remove a record. Returns whether anything was removed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// Size of a stored record in bytes. `None` when absent.
    fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError>;

    /// All record keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Total size of all records in bytes.
    fn total_size(&self) -> Result<u64, StorageError> {
        let mut total = 0u64;
        for key in self.keys()? {
            total = total.saturating_add(self.size_of(&key)?.unwrap_or(0));
        }
        Ok(total)
    }
}

impl<T: PayloadStorage + ?Sized> PayloadStorage for Box<T> {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(key, bytes)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).read(key)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        (**self).exists(key)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        (**self).remove(key)
    }

    fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError> {
        (**self).size_of(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).keys()
    }

    fn total_size(&self) -> Result<u64, StorageError> {
        (**self).total_size()
    }
}

impl<T: PayloadStorage + ?Sized> PayloadStorage for Arc<T> {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).write(key, bytes)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).read(key)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        (**self).exists(key)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        (**self).remove(key)
    }

    fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError> {
        (**self).size_of(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).keys()
    }

    fn total_size(&self) -> Result<u64, StorageError> {
        (**self).total_size()
    }
}

/// Storage operation that failed, for error context.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StorageOp {
    CreateDir,
    Write,
    Read,
    Remove,
    Metadata,
    List,
}

impl StorageOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDir => "create_dir",
            Self::Write => "write",
            Self::Read => "read",
            Self::Remove => "remove",
            Self::Metadata => "metadata",
            Self::List => "list",
        }
    }
}

impl core::fmt::Display for StorageOp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage {op} failed at {}: {source}", path.display())]
    Io {
        op: StorageOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub fn io(op: StorageOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn op(&self) -> StorageOp {
        match self {
            Self::Io { op, .. } => *op,
        }
    }
}
