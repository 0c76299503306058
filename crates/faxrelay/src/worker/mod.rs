pub mod job;
pub mod pool;
pub mod scanner;
pub mod scheduler;
pub mod stability;
pub mod state_store;

pub use job::{FailureKind, FileHandle, Job, JobKey, JobOutcome, JobReport, JobState};
pub use pool::WorkerPool;
pub use scanner::{check_directory, FileWatcher, ScanOutcome};
pub use scheduler::{Scheduler, TickSummary};
pub use stability::{FileObserver, FsObserver, Observation, StabilityGate};
pub use state_store::{
    open_store, InMemoryStateStore, JobStateStore, JsonFileStateStore, StoreEntry, TerminalState,
};

// Re-export crossbeam_channel for use in main
pub use crossbeam_channel;
