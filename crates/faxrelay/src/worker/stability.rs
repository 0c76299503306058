use std::path::Path;
use std::time::{Duration, SystemTime};

use log::debug;

use crate::worker::job::FileHandle;

/// Size and modification time of a file at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub size: u64,
    pub modified: SystemTime,
}

/// Source of file observations. Tests substitute a scripted observer.
pub trait FileObserver: Send + Sync {
    fn observe(&self, path: &Path) -> std::io::Result<Observation>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FsObserver;

impl FileObserver for FsObserver {
    fn observe(&self, path: &Path) -> std::io::Result<Observation> {
        let metadata = std::fs::metadata(path)?;
        Ok(Observation {
            size: metadata.len(),
            modified: metadata.modified()?,
        })
    }
}

/// Decides whether a file has finished being written: its size and mtime
/// must be unchanged across two observations one settle interval apart.
pub struct StabilityGate {
    settle: Duration,
    observer: Box<dyn FileObserver>,
}

impl StabilityGate {
    pub fn new(settle: Duration) -> Self {
        Self::with_observer(settle, Box::new(FsObserver))
    }

    pub fn with_observer(settle: Duration, observer: Box<dyn FileObserver>) -> Self {
        Self { settle, observer }
    }

    pub fn settle_interval(&self) -> Duration {
        self.settle
    }

    /// Compares a fresh observation against the handle captured earlier.
    pub fn is_unchanged(&self, handle: &FileHandle) -> bool {
        match self.observer.observe(&handle.path) {
            Ok(now) => {
                let modified = chrono::DateTime::<chrono::Utc>::from(now.modified);
                now.size == handle.size && modified == handle.modified
            }
            Err(e) => {
                debug!("Re-stat failed for {}: {}", handle.path.display(), e);
                false
            }
        }
    }

    /// Splits handles into stable and deferred. All handles share one settle
    /// wait so a tick costs a single interval regardless of file count.
    pub fn partition(&self, handles: Vec<FileHandle>) -> (Vec<FileHandle>, Vec<FileHandle>) {
        if handles.is_empty() {
            return (Vec::new(), Vec::new());
        }

        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }

        handles.into_iter().partition(|h| self.is_unchanged(h))
    }
}
