///! Temp-file janitor
///!
///! Every intermediate file a run creates is registered here and removed
///! exactly once: promptly via `release`, or by the terminal `sweep` that
///! the orchestrator runs on every exit path. Removal failures are
///! warnings, never errors.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
pub struct TempJanitor {
    files: Mutex<HashSet<PathBuf>>,
}

impl TempJanitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a file for cleanup.
    pub fn register(&self, path: impl AsRef<Path>) {
        self.files.lock().unwrap().insert(path.as_ref().to_path_buf());
    }

    /// Delete a tracked file now. No-op for untracked paths, so a file
    /// can never be deleted twice through the janitor.
    pub fn release(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let tracked = self.files.lock().unwrap().remove(path);
        if tracked {
            Self::remove(path);
        }
    }

    /// Delete everything still tracked. Returns how many files were
    /// actually removed from disk.
    pub fn sweep(&self) -> usize {
        let drained: Vec<PathBuf> = self.files.lock().unwrap().drain().collect();
        let mut removed = 0;
        for path in &drained {
            if Self::remove(path) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("Janitor swept {} leftover temp files", removed);
        }
        removed
    }

    /// Number of files currently tracked.
    pub fn tracked(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    fn remove(path: &Path) -> bool {
        match std::fs::remove_file(path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                tracing::warn!("Failed to delete temp file {:?}: {}", path, e);
                false
            }
        }
    }
}
