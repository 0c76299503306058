use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::WatchConfig;
use crate::error::WorkerError;
use crate::worker::job::FileHandle;
use crate::worker::stability::StabilityGate;
use crate::worker::state_store::JobStateStore;

/// Files found on one tick, split by the stability check.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub admitted: Vec<FileHandle>,
    pub deferred: Vec<FileHandle>,
}

/// Enumerates eligible fax images in the watch directory.
pub struct FileWatcher {
    directory: PathBuf,
    extensions: Vec<String>,
    recursive: bool,
    lookback: Duration,
    excluded: Vec<PathBuf>,
    store: Arc<dyn JobStateStore>,
    gate: StabilityGate,
}

impl FileWatcher {
    pub fn new(config: &WatchConfig, store: Arc<dyn JobStateStore>, gate: StabilityGate) -> Self {
        Self {
            directory: PathBuf::from(&config.directory),
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            recursive: config.recursive,
            lookback: config.lookback(),
            excluded: Vec::new(),
            store,
            gate,
        }
    }

    /// Skips a subtree, e.g. the converter's temp directory when it lives
    /// under the watch directory.
    pub fn exclude(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        self.excluded
            .push(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Confirms the watch directory exists and can be listed.
    pub fn check_reachable(&self) -> Result<(), WorkerError> {
        check_directory(&self.directory)
    }

    /// Lazily yields matching files inside the lookback window that have no
    /// terminal entry in the state store. Stability is not checked here.
    pub fn candidates(&self, now: DateTime<Utc>) -> impl Iterator<Item = FileHandle> + '_ {
        let max_depth = if self.recursive { usize::MAX } else { 1 };

        WalkDir::new(&self.directory)
            .min_depth(1)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(move |e| !self.is_excluded(e))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(move |entry| {
                entry.file_type().is_file() && self.has_eligible_extension(entry.path())
            })
            .filter_map(move |entry| match FileHandle::observe(entry.path(), now) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    debug!("Could not stat {}: {}", entry.path().display(), e);
                    None
                }
            })
            .filter(move |handle| self.within_lookback(handle, now))
            .filter(move |handle| !self.already_processed(handle))
    }

    /// Runs one scan tick: candidates, then the stability gate.
    pub fn scan(&self, now: DateTime<Utc>) -> Result<ScanOutcome, WorkerError> {
        self.check_reachable()?;

        let candidates: Vec<FileHandle> = self.candidates(now).collect();
        let found = candidates.len();
        let (admitted, deferred) = self.gate.partition(candidates);

        info!(
            "Scanned {}: {} candidate(s), {} admitted, {} deferred",
            self.directory.display(),
            found,
            admitted.len(),
            deferred.len()
        );
        for handle in &deferred {
            debug!("Deferring unstable file {}", handle.path.display());
        }

        Ok(ScanOutcome { admitted, deferred })
    }

    /// Forgets state entries for files that no longer exist.
    pub fn prune_missing(&self) -> usize {
        match self.store.prune(&|key| key.path.exists()) {
            Ok(removed) => {
                if removed > 0 {
                    debug!("Pruned {} state entries for removed files", removed);
                }
                removed
            }
            Err(e) => {
                warn!("Failed to prune job state: {}", e);
                0
            }
        }
    }

    fn has_eligible_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }

    fn within_lookback(&self, handle: &FileHandle, now: DateTime<Utc>) -> bool {
        if self.lookback.is_zero() {
            return true;
        }
        // future timestamps (clock skew on the share) count as fresh
        match (now - handle.modified).to_std() {
            Ok(age) => age <= self.lookback,
            Err(_) => true,
        }
    }

    fn already_processed(&self, handle: &FileHandle) -> bool {
        match self.store.get(&handle.key()) {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                warn!(
                    "State lookup failed for {}, skipping this tick: {}",
                    handle.path.display(),
                    e
                );
                true
            }
        }
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() || self.excluded.is_empty() {
            return false;
        }
        let path = entry
            .path()
            .canonicalize()
            .unwrap_or_else(|_| entry.path().to_path_buf());
        self.excluded.iter().any(|ex| *ex == path)
    }
}

/// Fails unless `directory` exists, is a directory and can be listed.
pub fn check_directory(directory: &Path) -> Result<(), WorkerError> {
    let unavailable = |source| WorkerError::DirectoryUnavailable {
        path: directory.to_path_buf(),
        source,
    };

    let metadata = std::fs::metadata(directory).map_err(unavailable)?;
    if !metadata.is_dir() {
        return Err(unavailable(std::io::Error::other("not a directory")));
    }
    std::fs::read_dir(directory).map_err(unavailable)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::state_store::{InMemoryStateStore, StoreEntry, TerminalState};
    use tempfile::TempDir;

    fn watcher(dir: &Path, store: Arc<dyn JobStateStore>) -> FileWatcher {
        let config = WatchConfig {
            directory: dir.to_string_lossy().to_string(),
            ..WatchConfig::default()
        };
        FileWatcher::new(&config, store, StabilityGate::new(Duration::ZERO))
    }

    #[test]
    fn test_scan_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let w = watcher(temp_dir.path(), Arc::new(InMemoryStateStore::new()));
        let outcome = w.scan(Utc::now()).unwrap();
        assert!(outcome.admitted.is_empty());
    }

    #[test]
    fn test_scan_matches_extensions_case_insensitively() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.tif"), b"II*\0").unwrap();
        std::fs::write(temp_dir.path().join("b.TIFF"), b"II*\0").unwrap();
        std::fs::write(temp_dir.path().join("c.pdf"), b"%PDF").unwrap();
        std::fs::write(temp_dir.path().join("noext"), b"x").unwrap();

        let w = watcher(temp_dir.path(), Arc::new(InMemoryStateStore::new()));
        let outcome = w.scan(Utc::now()).unwrap();
        assert_eq!(outcome.admitted.len(), 2);
    }

    #[test]
    fn test_scan_recurses_but_skips_excluded_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("2026").join("10");
        let temp = temp_dir.path().join("temp");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::create_dir_all(&temp).unwrap();
        std::fs::write(nested.join("nested.tif"), b"II*\0").unwrap();
        std::fs::write(temp.join("partial.tif"), b"II*\0").unwrap();

        let w = watcher(temp_dir.path(), Arc::new(InMemoryStateStore::new())).exclude(&temp);
        let outcome = w.scan(Utc::now()).unwrap();
        assert_eq!(outcome.admitted.len(), 1);
        assert!(outcome.admitted[0].path.ends_with("nested.tif"));
    }

    #[test]
    fn test_non_recursive_scan() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("sub");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("nested.tif"), b"II*\0").unwrap();
        std::fs::write(temp_dir.path().join("top.tif"), b"II*\0").unwrap();

        let config = WatchConfig {
            directory: temp_dir.path().to_string_lossy().to_string(),
            recursive: false,
            ..WatchConfig::default()
        };
        let w = FileWatcher::new(
            &config,
            Arc::new(InMemoryStateStore::new()),
            StabilityGate::new(Duration::ZERO),
        );
        let outcome = w.scan(Utc::now()).unwrap();
        assert_eq!(outcome.admitted.len(), 1);
        assert!(outcome.admitted[0].path.ends_with("top.tif"));
    }

    #[test]
    fn test_lookback_excludes_old_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("old.tif"), b"II*\0").unwrap();

        let w = watcher(temp_dir.path(), Arc::new(InMemoryStateStore::new()));
        let later = Utc::now() + chrono::Duration::minutes(11);
        assert_eq!(w.candidates(later).count(), 0);
        assert_eq!(w.candidates(Utc::now()).count(), 1);
    }

    #[test]
    fn test_processed_key_is_not_admitted_again() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("done.tif");
        std::fs::write(&path, b"II*\0").unwrap();

        let store: Arc<dyn JobStateStore> = Arc::new(InMemoryStateStore::new());
        let w = watcher(temp_dir.path(), Arc::clone(&store));

        let handle = w.candidates(Utc::now()).next().unwrap();
        store
            .put(&handle.key(), StoreEntry::now(TerminalState::Completed))
            .unwrap();

        assert_eq!(w.candidates(Utc::now()).count(), 0);
    }

    #[test]
    fn test_prune_missing_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gone.tif");
        std::fs::write(&path, b"II*\0").unwrap();

        let store: Arc<dyn JobStateStore> = Arc::new(InMemoryStateStore::new());
        let w = watcher(temp_dir.path(), Arc::clone(&store));
        let handle = w.candidates(Utc::now()).next().unwrap();
        store
            .put(&handle.key(), StoreEntry::now(TerminalState::Failed))
            .unwrap();

        assert_eq!(w.prune_missing(), 0);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(w.prune_missing(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_missing_directory_is_unreachable() {
        let temp_dir = TempDir::new().unwrap();
        let w = watcher(
            &temp_dir.path().join("missing"),
            Arc::new(InMemoryStateStore::new()),
        );
        assert!(matches!(
            w.check_reachable(),
            Err(WorkerError::DirectoryUnavailable { .. })
        ));
        assert!(w.scan(Utc::now()).is_err());
    }
}
