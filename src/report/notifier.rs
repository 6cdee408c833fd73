use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Told about files written into the cache so observers can pick them up
/// without waiting for a filesystem poll.
pub trait FileSystemNotifier: Send + Sync {
    fn refresh(&self, paths: &[PathBuf]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl FileSystemNotifier for NoopNotifier {
    fn refresh(&self, _paths: &[PathBuf]) {}
}

/// Keeps every refreshed path. Useful for status output and tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    refreshed: Mutex<Vec<PathBuf>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refreshed(&self) -> Vec<PathBuf> {
        self.refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|p| p == path)
    }
}

impl FileSystemNotifier for RecordingNotifier {
    fn refresh(&self, paths: &[PathBuf]) {
        self.refreshed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(paths);
    }
}
