pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod runner;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use error::StageError;
pub use events::{EventSink, JobEvent, NoopSink, RecordingSink, TracingSink};
pub use runner::Pipeline;
