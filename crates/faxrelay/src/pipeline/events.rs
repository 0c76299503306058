use std::sync::Mutex;

use crate::worker::job::{FailureKind, JobState};

/// Structured lifecycle events emitted while a job runs.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Discovered {
        job_id: String,
        file: String,
    },
    StageEntered {
        job_id: String,
        file: String,
        stage: JobState,
    },
    StageFailed {
        job_id: String,
        file: String,
        stage: JobState,
        kind: FailureKind,
        error: String,
    },
    NotificationFailed {
        job_id: String,
        file: String,
        error: String,
    },
    Deferred {
        job_id: String,
        file: String,
        reason: String,
    },
    Interrupted {
        job_id: String,
        file: String,
        stage: JobState,
    },
    Terminal {
        job_id: String,
        file: String,
        state: JobState,
        notified: bool,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// Discards events.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: JobEvent) {}
}

/// Forwards events to `tracing` with structured fields.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: JobEvent) {
        match event {
            JobEvent::Discovered { job_id, file } => {
                tracing::info!(%job_id, %file, "job discovered");
            }
            JobEvent::StageEntered {
                job_id,
                file,
                stage,
            } => {
                tracing::debug!(%job_id, %file, stage = stage.as_str(), "stage entered");
            }
            JobEvent::StageFailed {
                job_id,
                file,
                stage,
                kind,
                error,
            } => {
                tracing::warn!(
                    %job_id,
                    %file,
                    stage = stage.as_str(),
                    classification = kind.as_str(),
                    %error,
                    "stage failed"
                );
            }
            JobEvent::NotificationFailed {
                job_id,
                file,
                error,
            } => {
                tracing::error!(%job_id, %file, %error, "notification failed");
            }
            JobEvent::Deferred {
                job_id,
                file,
                reason,
            } => {
                tracing::info!(%job_id, %file, %reason, "job deferred to next tick");
            }
            JobEvent::Interrupted {
                job_id,
                file,
                stage,
            } => {
                tracing::warn!(%job_id, %file, stage = stage.as_str(), "job interrupted by shutdown");
            }
            JobEvent::Terminal {
                job_id,
                file,
                state,
                notified,
            } => {
                tracing::info!(%job_id, %file, state = state.as_str(), notified, "job finished");
            }
        }
    }
}

/// Keeps every event in memory; used by tests to assert on the sequence.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: JobEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
