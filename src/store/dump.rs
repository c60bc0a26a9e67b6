//! Transient per-run dump of raw telemetry payloads.

use super::StoreError;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Directory of raw payloads, cleared at the end of every run.
///
/// Shares its directory with the status snapshot, which is never removed.
#[derive(Debug)]
pub struct DataDump {
    dir: PathBuf,
    keep: String,
    count: AtomicUsize,
}

impl DataDump {
    pub fn new<P: AsRef<Path>>(dir: P, keep: &str) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            keep: keep.to_string(),
            count: AtomicUsize::new(0),
        }
    }

    /// Write one payload as `data_dump_{n}.json`, pretty-printed when it is JSON.
    pub fn write(&self, body: &str) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self.dir.join(format!("data_dump_{}.json", n));

        let contents = match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => serde_json::to_string_pretty(&value)?,
            Err(_) => body.to_string(),
        };
        fs::write(&path, contents).map_err(|e| StoreError::io(&path, e))?;
        Ok(path)
    }

    /// Remove everything except the kept file. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        self.count.store(0, Ordering::Relaxed);

        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy() == self.keep {
                continue;
            }

            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };

            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::error!("Failed to delete {}: {}", path.display(), e),
            }
        }
        removed
    }
}
