use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use crossbeam_channel::RecvTimeoutError;
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::worker::job::{Job, JobKey, JobOutcome, JobReport};
use crate::worker::pool::WorkerPool;
use crate::worker::scanner::FileWatcher;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Counts for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub admitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub interrupted: usize,
    pub notification_failures: usize,
    /// Terminal jobs whose state could not be stored.
    pub unrecorded: usize,
}

impl TickSummary {
    pub fn record(&mut self, report: &JobReport) {
        match &report.outcome {
            JobOutcome::Completed { notified, .. } => {
                self.completed += 1;
                if !notified {
                    self.notification_failures += 1;
                }
            }
            JobOutcome::Failed { notified, .. } => {
                self.failed += 1;
                if !notified {
                    self.notification_failures += 1;
                }
            }
            JobOutcome::Deferred { .. } => self.deferred += 1,
            JobOutcome::Interrupted { .. } => self.interrupted += 1,
        }
        if report.is_unrecorded() {
            self.unrecorded += 1;
        }
    }

    pub fn merge(&mut self, other: &TickSummary) {
        self.admitted += other.admitted;
        self.completed += other.completed;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.interrupted += other.interrupted;
        self.notification_failures += other.notification_failures;
        self.unrecorded += other.unrecorded;
    }
}

/// Runs watcher ticks and hands admitted files to the worker pool.
pub struct Scheduler {
    watcher: FileWatcher,
    pool: WorkerPool,
    poll_interval: Duration,
    shutdown_grace: Duration,
    shutdown: Arc<AtomicBool>,
    // Finished jobs the store failed to record; kept out of later ticks
    // until their file changes or disappears.
    held: Mutex<HashSet<JobKey>>,
}

impl Scheduler {
    pub fn new(
        watcher: FileWatcher,
        pool: WorkerPool,
        poll_interval: Duration,
        shutdown_grace: Duration,
    ) -> Self {
        let shutdown = pool.shutdown_flag();
        Self {
            watcher,
            pool,
            poll_interval,
            shutdown_grace,
            shutdown,
            held: Mutex::new(HashSet::new()),
        }
    }

    /// Setting the returned flag stops admission and ends `run_continuous`
    /// after the current tick.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn watcher(&self) -> &FileWatcher {
        &self.watcher
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Scans once and waits for every admitted job to finish.
    pub fn run_once(&self) -> Result<TickSummary, WorkerError> {
        let outcome = self.watcher.scan(Utc::now())?;
        let mut summary = TickSummary {
            deferred: outcome.deferred.len(),
            ..TickSummary::default()
        };

        let held = self.held_keys();
        let mut pending = 0usize;
        for handle in outcome.admitted {
            if held.contains(&handle.key()) {
                debug!("Skipping {}, its outcome is not recorded yet", handle.key());
                continue;
            }
            if self.is_shutdown() {
                info!("Shutdown requested, leaving remaining files for the next run");
                break;
            }
            if let Err(e) = self.pool.submit(Job::new(handle)) {
                if self.is_shutdown() {
                    info!("Shutdown requested, leaving remaining files for the next run");
                } else {
                    error!("Failed to submit job: {}", e);
                }
                break;
            }
            pending += 1;
        }
        summary.admitted = pending;

        self.collect(pending, &mut summary);

        info!(
            "Tick finished: {} admitted, {} completed, {} failed, {} deferred, {} interrupted",
            summary.admitted,
            summary.completed,
            summary.failed,
            summary.deferred,
            summary.interrupted
        );
        Ok(summary)
    }

    fn collect(&self, mut pending: usize, summary: &mut TickSummary) {
        let mut deadline: Option<Instant> = None;

        while pending > 0 {
            if deadline.is_none() && self.is_shutdown() {
                deadline = Some(Instant::now() + self.shutdown_grace);
            }

            match self.pool.recv_result_timeout(SLEEP_SLICE) {
                Ok(report) => {
                    pending -= 1;
                    summary.record(&report);
                    if report.is_unrecorded() {
                        self.hold(report.key);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let Some(deadline) = deadline else { continue };
                    let now = Instant::now();
                    if now >= deadline + self.shutdown_grace {
                        warn!("{} job(s) did not stop in time, abandoning", pending);
                        summary.interrupted += pending;
                        return;
                    }
                    if now >= deadline {
                        self.pool.cancel();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Workers exited on shutdown before picking these up.
                    summary.interrupted += pending;
                    return;
                }
            }
        }
    }

    /// Ticks until the shutdown flag is raised, then stops the pool.
    pub fn run_continuous(self) -> Result<TickSummary, WorkerError> {
        info!(
            "Watching {} every {:?}",
            self.watcher.directory().display(),
            self.poll_interval
        );
        let mut totals = TickSummary::default();

        while !self.is_shutdown() {
            match self.run_once() {
                Ok(summary) => totals.merge(&summary),
                // An unreachable share is retried on the next tick.
                Err(e) => error!("Tick failed: {}", e),
            }
            self.watcher.prune_missing();
            self.release_missing();
            self.sleep_interruptibly(self.poll_interval);
        }

        info!("Shutdown requested, stopping scheduler");
        self.close()?;
        Ok(totals)
    }

    /// Stops the pool, waiting at most the grace period.
    pub fn close(self) -> Result<(), WorkerError> {
        self.pool.wait_timeout(self.shutdown_grace)
    }

    fn held_keys(&self) -> HashSet<JobKey> {
        match self.held.lock() {
            Ok(held) => held.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn hold(&self, key: JobKey) {
        warn!("Holding {} in memory, its outcome could not be stored", key);
        match self.held.lock() {
            Ok(mut held) => held.insert(key),
            Err(poisoned) => poisoned.into_inner().insert(key),
        };
    }

    fn release_missing(&self) {
        if let Ok(mut held) = self.held.lock() {
            held.retain(|key| key.path.exists());
        }
    }

    fn sleep_interruptibly(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.is_shutdown() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
