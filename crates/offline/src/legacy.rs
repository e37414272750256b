//! Migration of the legacy failed-request buffer.
//!
//! Older SDK versions appended every failed request to a single
//! newline-delimited JSON file. On upgrade those requests are moved into the
//! payload cache, one payload per line, and the legacy file is removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use pulse_core::OutboundRequest;

use crate::cache::PayloadCache;
use crate::payload::Payload;
use crate::storage::PayloadStorage;

/// Outcome of a legacy buffer migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Requests now stored as payloads.
    pub migrated: usize,
    /// Lines that did not decode as a request.
    pub skipped: usize,
    /// Requests that decoded but could not be saved.
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum LegacyError {
    #[error("failed to read legacy request buffer {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove legacy request buffer {}: {source}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Move every request in the legacy buffer at `path` into `cache`.
///
/// A missing buffer migrates nothing. Undecodable lines and individual save
/// failures are logged and counted, not fatal; the buffer is removed once
/// every line has been handled.
pub fn migrate_legacy_requests<S: PayloadStorage>(
    path: &Path,
    cache: &PayloadCache<S>,
) -> Result<MigrationReport, LegacyError> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MigrationReport::default()),
        Err(source) => {
            return Err(LegacyError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut report = MigrationReport::default();
    let lines = contents
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace));

    for (index, line) in lines.enumerate() {
        let request: OutboundRequest = match serde_json::from_slice(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = index, error = %e, "skipping undecodable legacy request");
                report.skipped += 1;
                continue;
            }
        };

        let mut payload = Payload::from_request(request);
        match cache.save(&mut payload) {
            Ok(()) => report.migrated += 1,
            Err(e) => {
                warn!(line = index, error = %e, "failed to migrate legacy request");
                report.failed += 1;
            }
        }
    }

    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(LegacyError::Remove {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    info!(
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failed,
        "migrated legacy request buffer"
    );
    Ok(report)
}
