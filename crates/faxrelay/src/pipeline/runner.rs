use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn};

use crate::notify::{self, compose_failure, compose_success, NotificationError, Notifier};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::error::StageError;
use crate::pipeline::events::{EventSink, JobEvent, NoopSink};
use crate::processor::DocumentConverter;
use crate::recognition::{RecognitionBackend, RecognitionError};
use crate::worker::job::{Job, JobOutcome, JobReport, JobState};
use crate::worker::stability::StabilityGate;
use crate::worker::state_store::{JobStateStore, StoreEntry, TerminalState};

/// Drives one job through stabilize, convert, recognize and notify.
pub struct Pipeline {
    config: PipelineConfig,
    converter: Arc<dyn DocumentConverter>,
    backend: Arc<dyn RecognitionBackend>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn JobStateStore>,
    stability: StabilityGate,
    events: Arc<dyn EventSink>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        converter: Arc<dyn DocumentConverter>,
        backend: Arc<dyn RecognitionBackend>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn JobStateStore>,
    ) -> Self {
        Self {
            config,
            converter,
            backend,
            notifier,
            store,
            stability: StabilityGate::new(Duration::ZERO),
            events: Arc::new(NoopSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replaces the gate used for the pre-conversion re-check.
    pub fn with_stability(mut self, stability: StabilityGate) -> Self {
        self.stability = stability;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStateStore> {
        &self.store
    }

    /// Runs `job` to a terminal state, or stops early when the file changed
    /// under us or `cancel` was raised between stages.
    pub fn run(&self, job: Job, cancel: &AtomicBool) -> JobReport {
        let mut ctx = PipelineContext::new(job);
        let file_name = ctx.file_name();
        let job_id = ctx.job.id.clone();

        let _pipeline_span = info_span!("pipeline", job_id = %job_id, filename = %file_name).entered();

        self.events.emit(JobEvent::Discovered {
            job_id: job_id.clone(),
            file: file_name.clone(),
        });

        {
            let _step = info_span!("stabilize").entered();
            self.enter(&mut ctx, JobState::Stabilizing);
            if !self.stability.is_unchanged(&ctx.job.handle) {
                let reason = "file changed since it was admitted".to_string();
                self.events.emit(JobEvent::Deferred {
                    job_id: job_id.clone(),
                    file: file_name.clone(),
                    reason: reason.clone(),
                });
                ctx.job.abandon(JobOutcome::Deferred { reason });
                return JobReport::from_job(&ctx.job);
            }
        }

        if let Some(report) = self.interrupted(&mut ctx, cancel) {
            return report;
        }

        {
            let _step = info_span!("convert").entered();
            self.enter(&mut ctx, JobState::Converting);
            let converted = self.config.conversion_retry.run(
                "conversion",
                |_| self.converter.convert(&ctx.job.handle),
                |_| true,
            );
            match converted {
                Ok((artifact, attempts)) => {
                    ctx.job.attempts.conversion = attempts;
                    info!(pages = artifact.page_count, attempts, "converted to PDF");
                    ctx.artifact = Some(artifact);
                }
                Err(failure) => {
                    ctx.job.attempts.conversion = failure.attempts();
                    return self.fail(ctx, StageError::Conversion(failure.into_error()));
                }
            }
        }

        if let Some(report) = self.interrupted(&mut ctx, cancel) {
            return report;
        }

        {
            let _step = info_span!("recognize", backend = self.backend.name()).entered();
            self.enter(&mut ctx, JobState::Recognizing);
            let Some(artifact) = ctx.artifact.as_ref() else {
                return self.fail(ctx, StageError::Internal("no artifact after conversion".into()));
            };
            match self.backend.recognize(artifact) {
                Ok(result) => {
                    ctx.job.attempts.recognition = result.attempts;
                    info!(
                        confidence = result.confidence,
                        language = result.language.as_deref().unwrap_or("unknown"),
                        chars = result.stats.chars,
                        "recognition accepted"
                    );
                    ctx.result = Some(result);
                }
                Err(e) => {
                    ctx.job.attempts.recognition = match &e {
                        RecognitionError::RetriesExhausted { attempts, .. } => *attempts,
                        _ => 1,
                    };
                    return self.fail(ctx, StageError::Recognition(e));
                }
            }
        }

        if let Some(report) = self.interrupted(&mut ctx, cancel) {
            return report;
        }

        let _step = info_span!("notify").entered();
        self.enter(&mut ctx, JobState::Notifying);
        let page_count = ctx.artifact.as_ref().map(|a| a.page_count).unwrap_or(0);
        let Some(result) = ctx.result.take() else {
            return self.fail(ctx, StageError::Internal("no recognition result".into()));
        };
        let message = compose_success(
            &ctx.job.handle,
            &result,
            page_count,
            &self.config.subject_template,
        );
        let notified = self.notify(&mut ctx, &message);

        ctx.job.outcome = Some(JobOutcome::Completed { result, notified });
        self.finish(ctx, JobState::Completed)
    }

    /// Records a failure for a job whose run ended abnormally (for example a
    /// worker panic), alerting the recipients like any other failure.
    pub fn fail_internal(&self, job: Job, message: &str) -> JobReport {
        let ctx = PipelineContext::new(job);
        self.fail(ctx, StageError::Internal(message.to_string()))
    }

    fn fail(&self, mut ctx: PipelineContext, error: StageError) -> JobReport {
        let kind = error.kind();
        let message = error.to_string();
        let stage = ctx.job.state();

        self.events.emit(JobEvent::StageFailed {
            job_id: ctx.job.id.clone(),
            file: ctx.file_name(),
            stage,
            kind,
            error: message.clone(),
        });

        // The artifact is of no further use once a stage has failed.
        ctx.release_artifact();

        self.enter(&mut ctx, JobState::Notifying);
        let alert = compose_failure(
            &ctx.job.handle,
            kind,
            &message,
            &self.config.failure_subject_template,
        );
        let notified = self.notify(&mut ctx, &alert);

        ctx.job.outcome = Some(JobOutcome::Failed {
            kind,
            message,
            notified,
        });
        self.finish(ctx, JobState::Failed)
    }

    fn notify(&self, ctx: &mut PipelineContext, message: &notify::OutboundMessage) -> bool {
        match notify::deliver_with_retry(
            self.notifier.as_ref(),
            &self.config.notification_retry,
            message,
        ) {
            Ok(attempts) => {
                ctx.job.attempts.notification = attempts;
                true
            }
            Err(e) => {
                ctx.job.attempts.notification = match &e {
                    NotificationError::RetriesExhausted { attempts, .. } => *attempts,
                    _ => 1,
                };
                self.events.emit(JobEvent::NotificationFailed {
                    job_id: ctx.job.id.clone(),
                    file: ctx.file_name(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    fn finish(&self, mut ctx: PipelineContext, terminal: JobState) -> JobReport {
        ctx.release_artifact();
        self.enter(&mut ctx, terminal);

        let recorded = match TerminalState::from_job_state(ctx.job.state()) {
            Some(state) => match self.store.put(&ctx.job.key, StoreEntry::now(state)) {
                Ok(()) => true,
                Err(e) => {
                    error!(key = %ctx.job.key, error = %e, "failed to record job outcome");
                    false
                }
            },
            None => false,
        };

        let notified = match &ctx.job.outcome {
            Some(JobOutcome::Completed { notified, .. })
            | Some(JobOutcome::Failed { notified, .. }) => *notified,
            _ => false,
        };
        self.events.emit(JobEvent::Terminal {
            job_id: ctx.job.id.clone(),
            file: ctx.file_name(),
            state: ctx.job.state(),
            notified,
        });
        JobReport {
            recorded,
            ..JobReport::from_job(&ctx.job)
        }
    }

    fn interrupted(&self, ctx: &mut PipelineContext, cancel: &AtomicBool) -> Option<JobReport> {
        if !cancel.load(Ordering::Relaxed) {
            return None;
        }
        let last_state = ctx.job.state();
        warn!(stage = last_state.as_str(), "shutdown requested, abandoning job");
        ctx.release_artifact();
        self.events.emit(JobEvent::Interrupted {
            job_id: ctx.job.id.clone(),
            file: ctx.file_name(),
            stage: last_state,
        });
        ctx.job.abandon(JobOutcome::Interrupted { last_state });
        Some(JobReport::from_job(&ctx.job))
    }

    fn enter(&self, ctx: &mut PipelineContext, next: JobState) {
        if let Err(e) = ctx.job.advance(next) {
            // Only reachable through a programming error in the stage order.
            error!(error = %e, "rejected job state transition");
            return;
        }
        if !next.is_terminal() {
            self.events.emit(JobEvent::StageEntered {
                job_id: ctx.job.id.clone(),
                file: ctx.file_name(),
                stage: next,
            });
        }
    }
}
