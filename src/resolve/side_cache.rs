//! Persisted record of previously resolved files.
//!
//! Maps a local file path to the URL it came from, its sha256, size and
//! modification time. A checksum-verified root whose record still matches its
//! expected sha256 and current size and mtime is trusted without rehashing. The file is read once at
//! startup and rewritten atomically at the end of a run that changed it.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fetch::FetchedFile;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SideCacheError {
    #[error("I/O error writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize side cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One previously resolved file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideCacheRecord {
    /// `None` when the file was verified in place rather than downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub sha256: String,
    pub size: u64,
    /// File mtime when recorded. Records without one never match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SideCacheFile {
    version: u32,
    entries: BTreeMap<PathBuf, SideCacheRecord>,
}

/// In-memory side cache with optional backing file.
#[derive(Debug)]
pub struct SideCache {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<PathBuf, SideCacheRecord>>,
    dirty: AtomicBool,
}

impl SideCache {
    /// A side cache that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(BTreeMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load from `path`. A missing file yields an empty cache; an unreadable
    /// or corrupt file is logged and also yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<SideCacheFile>(&bytes) {
                Ok(file) if file.version == FORMAT_VERSION => file.entries,
                Ok(file) => {
                    warn!(
                        path = %path.display(),
                        version = file.version,
                        "ignoring side cache with unknown format version"
                    );
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring corrupt side cache");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read side cache");
                BTreeMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "loaded side cache");
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn lookup(&self, path: &Path) -> Option<SideCacheRecord> {
        self.lock().get(path).cloned()
    }

    /// True if `path` has a record with this sha256 and the file on disk
    /// still has the recorded size and modification time.
    pub fn matches(&self, path: &Path, sha256: &str) -> bool {
        let Some(record) = self.lookup(path) else {
            return false;
        };
        if !record.sha256.eq_ignore_ascii_case(sha256) {
            return false;
        }
        let Ok(metadata) = std::fs::metadata(path) else {
            return false;
        };
        metadata.is_file()
            && metadata.len() == record.size
            && record.modified.is_some()
            && record.modified == modified_time(&metadata)
    }

    pub fn record(&self, file: &FetchedFile) {
        let modified = std::fs::metadata(&file.path)
            .ok()
            .and_then(|metadata| modified_time(&metadata));
        let record = SideCacheRecord {
            url: file.url.clone(),
            sha256: file.sha256.clone(),
            size: file.size,
            modified,
            resolved_at: Utc::now(),
        };
        self.lock().insert(file.path.clone(), record);
        self.dirty.store(true, Ordering::Release);
    }

    pub fn remove(&self, path: &Path) -> bool {
        let removed = self.lock().remove(path).is_some();
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// Write the cache if it changed since the last save.
    ///
    /// Returns whether anything was written. The file is replaced atomically.
    pub fn save(&self) -> Result<bool, SideCacheError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }

        let result = self.write_to(path);
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result.map(|_| true)
    }

    fn write_to(&self, path: &Path) -> Result<(), SideCacheError> {
        let contents = {
            let entries = self.lock();
            serde_json::to_vec_pretty(&SideCacheFileRef {
                version: FORMAT_VERSION,
                entries: &*entries,
            })?
        };

        let io_error = |source| SideCacheError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_error)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".artsync-side-cache-")
            .tempfile_in(dir)
            .map_err(io_error)?;
        temp.write_all(&contents).map_err(io_error)?;
        temp.as_file().sync_all().map_err(io_error)?;
        temp.persist(path).map_err(|e| io_error(e.error))?;
        debug!(path = %path.display(), bytes = contents.len(), "saved side cache");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, SideCacheRecord>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn modified_time(metadata: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

#[derive(Serialize)]
struct SideCacheFileRef<'a> {
    version: u32,
    entries: &'a BTreeMap<PathBuf, SideCacheRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Overwrite in place and push the mtime forward so the change is
    /// visible even on filesystems with coarse timestamps.
    fn overwrite(path: &Path, contents: &[u8]) {
        std::fs::write(path, contents).unwrap();
        OpenOptions::new()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
    }

    fn fetched(path: &Path, sha: &str, size: u64) -> FetchedFile {
        FetchedFile {
            path: path.to_path_buf(),
            url: Some("https://repo/x.jar".to_string()),
            sha256: sha.to_string(),
            size,
        }
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = SideCache::load(dir.path().join("none.json"));
        assert!(cache.is_empty());
        assert!(!cache.is_dirty());
    }

    #[test]
    fn corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("side.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(SideCache::load(&path).is_empty());
    }

    #[test]
    fn save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("side.json");
        let artifact = dir.path().join("x.jar");
        std::fs::write(&artifact, b"abc").unwrap();
        let sha = "a".repeat(64);

        let cache = SideCache::load(&path);
        cache.record(&fetched(&artifact, &sha, 3));
        assert!(cache.save().unwrap());
        assert!(!cache.save().unwrap());

        let reloaded = SideCache::load(&path);
        let record = reloaded.lookup(&artifact).unwrap();
        assert_eq!(record.sha256, sha);
        assert_eq!(record.url.as_deref(), Some("https://repo/x.jar"));
        assert!(reloaded.matches(&artifact, &sha));
    }

    #[test]
    fn match_requires_same_size_and_sha() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("x.jar");
        std::fs::write(&artifact, b"abc").unwrap();
        let sha = "b".repeat(64);

        let cache = SideCache::in_memory();
        cache.record(&fetched(&artifact, &sha, 3));
        assert!(cache.matches(&artifact, &sha));
        assert!(!cache.matches(&artifact, &"c".repeat(64)));

        std::fs::write(&artifact, b"abcd").unwrap();
        assert!(!cache.matches(&artifact, &sha));

        std::fs::remove_file(&artifact).unwrap();
        assert!(!cache.matches(&artifact, &sha));
    }

    #[test]
    fn same_size_rewrite_is_not_trusted() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("x.jar");
        std::fs::write(&artifact, b"abc").unwrap();
        let sha = "e".repeat(64);

        let cache = SideCache::in_memory();
        cache.record(&fetched(&artifact, &sha, 3));
        assert!(cache.matches(&artifact, &sha));

        overwrite(&artifact, b"xyz");
        assert!(!cache.matches(&artifact, &sha));
    }

    #[test]
    fn record_without_mtime_is_not_trusted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("side.json");
        let artifact = dir.path().join("x.jar");
        std::fs::write(&artifact, b"abc").unwrap();
        let sha = "f".repeat(64);
        let contents = serde_json::json!({
            "version": 1,
            "entries": {
                (artifact.display().to_string()): {
                    "sha256": sha,
                    "size": 3,
                    "resolved_at": "2024-01-01T00:00:00Z"
                }
            }
        });
        std::fs::write(&path, serde_json::to_vec(&contents).unwrap()).unwrap();

        let cache = SideCache::load(&path);
        assert!(cache.lookup(&artifact).is_some());
        assert!(!cache.matches(&artifact, &sha));
    }

    #[test]
    fn in_memory_never_writes() {
        let cache = SideCache::in_memory();
        cache.record(&fetched(Path::new("/tmp/x.jar"), "d", 1));
        assert!(!cache.save().unwrap());
        assert!(cache.remove(Path::new("/tmp/x.jar")));
    }
}
