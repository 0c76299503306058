pub mod app;
pub mod config;
pub mod error;
pub mod health;
pub mod notify;
pub mod pipeline;
pub mod processor;
pub mod recognition;
pub mod retry;
pub mod sanitize;
pub mod secrets;
pub mod worker;

pub use app::{App, Components};
pub use config::{load_config, load_env_file, Config};
pub use error::{
    ConfigError, ConversionError, FaxRelayError, Result, StoreError, WorkerError,
};
pub use health::HealthReport;
pub use notify::{NotificationError, Notifier};
pub use pipeline::{EventSink, JobEvent, Pipeline, PipelineConfig};
pub use recognition::{RecognitionBackend, RecognitionError, RecognitionResult};
pub use secrets::{resolve_secret, SecretError, SecretSource};
pub use worker::{JobState, Scheduler, TickSummary};
