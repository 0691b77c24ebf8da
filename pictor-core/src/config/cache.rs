use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// One persisted parse result: the serialized flattened map plus the verbatim
/// root-source bytes used as the next validity fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub map: Vec<u8>,
    pub fingerprint: Vec<u8>,
}

/// A read/write pair of named blobs; `load` only ever reports complete pairs
pub trait CacheStorage {
    fn load(&self) -> Result<Option<CacheRecord>>;
    fn save(&self, record: &CacheRecord) -> Result<()>;
}

/// Two co-located files under one directory
#[derive(Debug, Clone)]
pub struct DirCacheStorage {
    map_path: PathBuf,
    fingerprint_path: PathBuf,
}

impl DirCacheStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            map_path: dir.join("config-map.json"),
            fingerprint_path: dir.join("config-source.xml"),
        }
    }

    pub fn map_path(&self) -> &Path {
        &self.map_path
    }

    pub fn fingerprint_path(&self) -> &Path {
        &self.fingerprint_path
    }
}

impl CacheStorage for DirCacheStorage {
    fn load(&self) -> Result<Option<CacheRecord>> {
        if !self.map_path.exists() || !self.fingerprint_path.exists() {
            return Ok(None);
        }

        let map = std::fs::read(&self.map_path).map_err(|err| {
            Error::Cache(format!("failed to read '{}': {err}", self.map_path.display()))
        })?;
        let fingerprint = std::fs::read(&self.fingerprint_path).map_err(|err| {
            Error::Cache(format!(
                "failed to read '{}': {err}",
                self.fingerprint_path.display()
            ))
        })?;

        Ok(Some(CacheRecord { map, fingerprint }))
    }

    fn save(&self, record: &CacheRecord) -> Result<()> {
        // Map first. A crash between the two writes leaves a stale
        // fingerprint, which only costs a re-parse on the next load; the
        // reverse order could serve a stale map as fresh.
        write_atomic(&self.map_path, &record.map)?;
        write_atomic(&self.fingerprint_path, &record.fingerprint)
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            Error::Cache(format!("failed to create '{}': {err}", parent.display()))
        })?;
    }

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path).map_err(|err| {
            Error::Cache(format!("failed to create '{}': {err}", tmp_path.display()))
        })?;
        file.write_all(payload).map_err(|err| {
            Error::Cache(format!("failed to write '{}': {err}", tmp_path.display()))
        })?;
        file.sync_all().map_err(|err| {
            Error::Cache(format!("failed to sync '{}': {err}", tmp_path.display()))
        })?;
    }

    std::fs::rename(&tmp_path, path).map_err(|err| {
        Error::Cache(format!(
            "failed to move cache blob into place at '{}': {err}",
            path.display()
        ))
    })
}

/// In-memory pair, mostly for tests
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    record: Mutex<Option<CacheRecord>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStorage for MemoryCacheStorage {
    fn load(&self) -> Result<Option<CacheRecord>> {
        Ok(self.record.lock().expect("cache mutex poisoned").clone())
    }

    fn save(&self, record: &CacheRecord) -> Result<()> {
        *self.record.lock().expect("cache mutex poisoned") = Some(record.clone());
        Ok(())
    }
}
