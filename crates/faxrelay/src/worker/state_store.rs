use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::worker::job::{JobKey, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Completed,
    Failed,
}

impl TerminalState {
    pub fn from_job_state(state: JobState) -> Option<Self> {
        match state {
            JobState::Completed => Some(Self::Completed),
            JobState::Failed => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub state: TerminalState,
    pub recorded_at: DateTime<Utc>,
}

impl StoreEntry {
    pub fn now(state: TerminalState) -> Self {
        Self {
            state,
            recorded_at: Utc::now(),
        }
    }
}

/// Terminal outcome per job key; consulted by the watcher so a processed
/// file is not dispatched twice for the same modification time.
pub trait JobStateStore: Send + Sync {
    fn get(&self, key: &JobKey) -> Result<Option<StoreEntry>, StoreError>;

    fn put(&self, key: &JobKey, entry: StoreEntry) -> Result<(), StoreError>;

    /// Drops entries for which `keep` returns false. Returns the number removed.
    fn prune(&self, keep: &dyn Fn(&JobKey) -> bool) -> Result<usize, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: Mutex<HashMap<JobKey, StoreEntry>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStateStore for InMemoryStateStore {
    fn get(&self, key: &JobKey) -> Result<Option<StoreEntry>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).copied())
    }

    fn put(&self, key: &JobKey, entry: StoreEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.clone(), entry);
        Ok(())
    }

    fn prune(&self, keep: &dyn Fn(&JobKey) -> bool) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let before = entries.len();
        entries.retain(|key, _| keep(key));
        Ok(before - entries.len())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.len())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    key: JobKey,
    #[serde(flatten)]
    entry: StoreEntry,
}

/// JSON-file backed store. The whole map is rewritten on every change
/// through a temp file in the same directory, then renamed into place.
#[derive(Debug)]
pub struct JsonFileStateStore {
    path: PathBuf,
    entries: Mutex<HashMap<JobKey, StoreEntry>>,
}

impl JsonFileStateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = Self::load(&path)?;
        info!(
            "Loaded {} job state entries from {}",
            entries.len(),
            path.display()
        );
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<JobKey, StoreEntry>, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                return Ok(HashMap::new());
            }
            Err(e) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let records: Vec<Record> =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(records.into_iter().map(|r| (r.key, r.entry)).collect())
    }

    fn persist(&self, entries: &HashMap<JobKey, StoreEntry>) -> Result<(), StoreError> {
        let write_err = |source: std::io::Error| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut records: Vec<Record> = entries
            .iter()
            .map(|(key, entry)| Record {
                key: key.clone(),
                entry: *entry,
            })
            .collect();
        records.sort_by(|a, b| a.entry.recorded_at.cmp(&b.entry.recorded_at));

        let json = serde_json::to_vec_pretty(&records)
            .map_err(|e| write_err(std::io::Error::other(e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(&json).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;

        Ok(())
    }
}

impl JobStateStore for JsonFileStateStore {
    fn get(&self, key: &JobKey) -> Result<Option<StoreEntry>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).copied())
    }

    fn put(&self, key: &JobKey, entry: StoreEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let previous = entries.insert(key.clone(), entry);
        if let Err(e) = self.persist(&entries) {
            // keep memory and disk in agreement
            match previous {
                Some(prev) => entries.insert(key.clone(), prev),
                None => entries.remove(key),
            };
            warn!("Failed to persist job state for {}: {}", key, e);
            return Err(e);
        }
        Ok(())
    }

    fn prune(&self, keep: &dyn Fn(&JobKey) -> bool) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let removed: Vec<(JobKey, StoreEntry)> = entries
            .iter()
            .filter(|(key, _)| !keep(key))
            .map(|(key, entry)| (key.clone(), *entry))
            .collect();
        if removed.is_empty() {
            return Ok(0);
        }

        for (key, _) in &removed {
            entries.remove(key);
        }
        if let Err(e) = self.persist(&entries) {
            let count = removed.len();
            entries.extend(removed);
            warn!("Failed to persist pruning of {} job state entries: {}", count, e);
            return Err(e);
        }
        Ok(removed.len())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.len())
    }
}

/// Opens the configured backing: a JSON file, or memory when `path` is `None`.
pub fn open_store(path: Option<&Path>) -> Result<Box<dyn JobStateStore>, StoreError> {
    match path {
        Some(path) => Ok(Box::new(JsonFileStateStore::open(path)?)),
        None => {
            info!("Job state is kept in memory only");
            Ok(Box::new(InMemoryStateStore::new()))
        }
    }
}
