//! Filesystem-backed record storage: one JSON file per payload.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::{PayloadStorage, StorageError, StorageOp};

/// Extension of every record file. Anything else in the directory is ignored.
pub const RECORD_EXTENSION: &str = "json";

/// Directory of `<key>.json` records.
///
/// The directory is created lazily on the first write. Writes go to a
/// temporary file in the same directory which is then renamed over the
/// target, so a crash never leaves a truncated record behind.
#[derive(Debug, Clone)]
pub struct FsStorage {
    dir: PathBuf,
}

impl FsStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of the record file for `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{RECORD_EXTENSION}"))
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| StorageError::io(StorageOp::CreateDir, &self.dir, e))
    }
}

impl PayloadStorage for FsStorage {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.ensure_dir()?;
        let path = self.path_for(key);

        let mut temp = NamedTempFile::new_in(&self.dir)
            .map_err(|e| StorageError::io(StorageOp::Write, &self.dir, e))?;
        temp.write_all(bytes)
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| StorageError::io(StorageOp::Write, temp.path(), e))?;
        temp.persist(&path)
            .map_err(|e| StorageError::io(StorageOp::Write, &path, e.error))?;

        Ok(())
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(StorageOp::Read, path, e)),
        }
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key);
        path.try_exists()
            .map_err(|e| StorageError::io(StorageOp::Metadata, path, e))
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(StorageOp::Remove, path, e)),
        }
    }

    fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(StorageOp::Metadata, path, e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(StorageOp::List, &self.dir, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(StorageOp::List, &self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let is_file = entry
                .file_type()
                .map_err(|e| StorageError::io(StorageOp::Metadata, &path, e))?
                .is_file();
            if !is_file {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                keys.push(stem.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }
}
