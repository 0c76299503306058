use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender,
};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::pipeline::Pipeline;
use crate::worker::job::{Job, JobReport};

const SUBMIT_SLICE: Duration = Duration::from_millis(100);

/// Fixed set of worker threads, each running one job at a time.
pub struct WorkerPool {
    job_sender: Sender<Job>,
    result_receiver: Receiver<JobReport>,
    done_receiver: Receiver<()>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl WorkerPool {
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(pipeline: Arc<Pipeline>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (job_sender, job_receiver) = bounded::<Job>(worker_count * 2);
        // Unbounded so a worker never blocks handing back a report while
        // the scheduler is still submitting.
        let (result_sender, result_receiver) = unbounded::<JobReport>();
        let (done_sender, done_receiver) = bounded::<()>(0);
        let shutdown = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let result_tx = result_sender.clone();
            let done_tx = done_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let cancel_flag = Arc::clone(&cancel);
            let worker_pipeline = Arc::clone(&pipeline);

            let handle = thread::spawn(move || {
                run_worker(
                    worker_id,
                    job_rx,
                    result_tx,
                    shutdown_flag,
                    cancel_flag,
                    worker_pipeline,
                );
                // Dropping the last sender disconnects `done_receiver`.
                drop(done_tx);
            });

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Self {
            job_sender,
            result_receiver,
            done_receiver,
            workers,
            shutdown,
            cancel,
        }
    }

    /// Queues a job, blocking while the queue is full. Gives up with
    /// `ChannelClosed` once shutdown is requested.
    pub fn submit(&self, job: Job) -> Result<(), WorkerError> {
        let mut job = job;
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(WorkerError::ChannelClosed);
            }

            match self.job_sender.send_timeout(job, SUBMIT_SLICE) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => job = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(WorkerError::ChannelClosed),
            }
        }
    }

    pub fn recv_result(&self) -> Option<JobReport> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Result<JobReport, RecvTimeoutError> {
        self.result_receiver.recv_timeout(timeout)
    }

    /// Flag observed by workers before taking the next job. Setting it stops
    /// admission; jobs already running carry on.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Asks running jobs to stop at their next stage boundary.
    pub fn cancel(&self) {
        if !self.cancel.swap(true, Ordering::Relaxed) {
            warn!("Cancelling in-flight jobs");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Waits for every worker to exit.
    pub fn wait(self) {
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    /// Stops the pool and waits at most `grace` for in-flight jobs. On
    /// timeout, running jobs are cancelled and their threads left detached.
    pub fn wait_timeout(self, grace: Duration) -> Result<(), WorkerError> {
        self.shutdown();
        let deadline = Instant::now() + grace;

        match self.done_receiver.recv_deadline(deadline) {
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) | Ok(()) => {
                self.wait();
                Ok(())
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                self.cancel();
                warn!(
                    "Workers still busy after {:?} grace period, abandoning",
                    grace
                );
                Err(WorkerError::ShutdownTimeout(grace))
            }
        }
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<Job>,
    result_sender: Sender<JobReport>,
    shutdown: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    pipeline: Arc<Pipeline>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                debug!("Worker {} processing job {} ({})", worker_id, job.id, job.key);

                let fallback = job.clone();
                let report = match panic::catch_unwind(AssertUnwindSafe(|| {
                    pipeline.run(job, &cancel)
                })) {
                    Ok(report) => report,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!("Worker {} job {} panicked: {}", worker_id, fallback.id, message);
                        pipeline.fail_internal(fallback, &format!("worker panicked: {}", message))
                    }
                };

                if let Err(e) = result_sender.send(report) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
