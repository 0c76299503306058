use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recognition::RecognitionResult;

/// A candidate file as observed during one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub discovered_at: DateTime<Utc>,
}

impl FileHandle {
    pub fn new(
        path: impl Into<PathBuf>,
        size: u64,
        modified: SystemTime,
        discovered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.into(),
            size,
            modified: DateTime::<Utc>::from(modified),
            discovered_at,
        }
    }

    /// Stats `path` and captures it with the given discovery time.
    pub fn observe(path: &Path, discovered_at: DateTime<Utc>) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self::new(
            path,
            metadata.len(),
            metadata.modified()?,
            discovered_at,
        ))
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(&self.path, self.modified)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn mime_type(&self) -> Option<String> {
        mime_guess::from_path(&self.path)
            .first()
            .map(|m| m.to_string())
    }
}

/// Identity of a job: the file path plus its modification time, so a file
/// rewritten after processing is picked up as new work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub path: PathBuf,
    pub modified_ms: i64,
}

impl JobKey {
    pub fn new(path: &Path, modified: DateTime<Utc>) -> Self {
        Self {
            path: path.to_path_buf(),
            modified_ms: modified.timestamp_millis(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.path.display(), self.modified_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Discovered,
    Stabilizing,
    Converting,
    Recognizing,
    Notifying,
    Completed,
    Failed,
}

impl JobState {
    fn rank(self) -> u8 {
        match self {
            Self::Discovered => 0,
            Self::Stabilizing => 1,
            Self::Converting => 2,
            Self::Recognizing => 3,
            Self::Notifying => 4,
            Self::Completed | Self::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Transitions only move forward; `Failed` is reachable from any
    /// non-terminal state.
    pub fn can_advance_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Stabilizing => "stabilizing",
            Self::Converting => "converting",
            Self::Recognizing => "recognizing",
            Self::Notifying => "notifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageAttempts {
    pub conversion: u32,
    pub recognition: u32,
    pub notification: u32,
}

/// Coarse classification carried in failure alerts and the job summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Conversion,
    RecognitionTransient,
    RecognitionRejected,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversion => "conversion_error",
            Self::RecognitionTransient => "recognition_error_transient",
            Self::RecognitionRejected => "recognition_error",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed {
        result: RecognitionResult,
        notified: bool,
    },
    Failed {
        kind: FailureKind,
        message: String,
        notified: bool,
    },
    /// The file was still changing; it is left for the next tick.
    Deferred { reason: String },
    /// Shutdown was requested before the job reached a terminal state.
    Interrupted { last_state: JobState },
}

impl JobOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// One file's run through the pipeline.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub key: JobKey,
    pub handle: FileHandle,
    state: JobState,
    pub attempts: StageAttempts,
    pub discovered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
}

impl Job {
    pub fn new(handle: FileHandle) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: handle.key(),
            discovered_at: handle.discovered_at,
            handle,
            state: JobState::Discovered,
            attempts: StageAttempts::default(),
            started_at: None,
            finished_at: None,
            outcome: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn advance(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if self.started_at.is_none() && next != JobState::Discovered {
            self.started_at = Some(Utc::now());
        }
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.state = next;
        Ok(())
    }

    /// Ends the job without a terminal state (deferred or interrupted).
    pub fn abandon(&mut self, outcome: JobOutcome) {
        debug_assert!(!outcome.is_terminal());
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }
}

/// What the pool hands back to the scheduler once a job finishes.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub key: JobKey,
    pub file_name: String,
    pub final_state: JobState,
    pub attempts: StageAttempts,
    pub outcome: JobOutcome,
    /// Whether the terminal state reached the job state store.
    pub recorded: bool,
}

impl JobReport {
    pub fn from_job(job: &Job) -> Self {
        let outcome = job.outcome.clone().unwrap_or(JobOutcome::Failed {
            kind: FailureKind::Internal,
            message: "job finished without an outcome".to_string(),
            notified: false,
        });
        Self {
            job_id: job.id.clone(),
            key: job.key.clone(),
            file_name: job.handle.file_name(),
            final_state: job.state,
            attempts: job.attempts,
            outcome,
            recorded: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_failure()
    }

    /// A terminal job whose state could not be stored.
    pub fn is_unrecorded(&self) -> bool {
        !self.recorded
            && matches!(
                self.outcome,
                JobOutcome::Completed { .. } | JobOutcome::Failed { .. }
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn handle(path: &str, modified_ms: i64) -> FileHandle {
        FileHandle {
            path: PathBuf::from(path),
            size: 1024,
            modified: Utc.timestamp_millis_opt(modified_ms).unwrap(),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_key_changes_with_modification_time() {
        let a = handle("/fax/scan.tif", 1_000);
        let b = handle("/fax/scan.tif", 2_000);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), handle("/fax/scan.tif", 1_000).key());
        assert_eq!(a.key().to_string(), "/fax/scan.tif@1000");
    }

    #[test]
    fn test_file_name_and_mime() {
        let h = handle("/fax/in/scan_0001.tif", 0);
        assert_eq!(h.file_name(), "scan_0001.tif");
        assert_eq!(h.mime_type().as_deref(), Some("image/tiff"));
    }

    #[test]
    fn test_full_forward_path() {
        let mut job = Job::new(handle("/fax/a.tif", 0));
        assert_eq!(job.state(), JobState::Discovered);
        for next in [
            JobState::Stabilizing,
            JobState::Converting,
            JobState::Recognizing,
            JobState::Notifying,
            JobState::Completed,
        ] {
            job.advance(next).unwrap();
        }
        assert!(job.started_at.is_some());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_no_state_is_revisited() {
        let mut job = Job::new(handle("/fax/a.tif", 0));
        job.advance(JobState::Converting).unwrap();
        assert_eq!(
            job.advance(JobState::Stabilizing),
            Err(InvalidTransition {
                from: JobState::Converting,
                to: JobState::Stabilizing
            })
        );
        assert!(job.advance(JobState::Converting).is_err());
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal_state() {
        for state in [
            JobState::Discovered,
            JobState::Stabilizing,
            JobState::Converting,
            JobState::Recognizing,
            JobState::Notifying,
        ] {
            assert!(state.can_advance_to(JobState::Failed), "{}", state);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new(handle("/fax/a.tif", 0));
        job.advance(JobState::Failed).unwrap();
        assert!(job.advance(JobState::Completed).is_err());
        assert!(job.advance(JobState::Failed).is_err());
    }

    #[test]
    fn test_report_without_outcome_is_internal_failure() {
        let job = Job::new(handle("/fax/a.tif", 0));
        let report = JobReport::from_job(&job);
        assert!(report.is_failure());
        assert!(matches!(
            report.outcome,
            JobOutcome::Failed {
                kind: FailureKind::Internal,
                ..
            }
        ));
    }
}
