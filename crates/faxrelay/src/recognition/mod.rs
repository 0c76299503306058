pub mod azure;
pub mod criteria;
pub mod custom;
pub mod error;
pub mod google;
pub mod http;
pub mod polling;
pub mod sync;

use serde::Serialize;

use crate::config::{BackendKind, RecognitionConfig};
use crate::error::ConfigError;
use crate::processor::DocumentArtifact;

pub use criteria::{RecognitionCriteria, TextStats};
pub use azure::AzureReadTransport;
pub use custom::HttpCustomApi;
pub use error::RecognitionError;
pub use polling::{PollingBackend, PollingTransport};
pub use sync::{SyncBackend, SyncTransport};

/// What a vendor returned, before threshold and language checks.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecognition {
    pub text: String,
    pub confidence: f32,
    pub language: Option<String>,
}

/// Accepted recognition output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub language: Option<String>,
    pub language_valid: bool,
    pub stats: TextStats,
    /// Calls made before the result was obtained.
    pub attempts: u32,
}

/// Extracts text from a document. Implementations handle their own
/// transient retry and any polling internally.
pub trait RecognitionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn recognize(&self, artifact: &DocumentArtifact)
        -> Result<RecognitionResult, RecognitionError>;
}

/// Builds the backend selected in config.
pub fn build_backend(config: &RecognitionConfig) -> Result<Box<dyn RecognitionBackend>, ConfigError> {
    let backend: Box<dyn RecognitionBackend> = match config.backend {
        BackendKind::CustomApi => Box::new(custom::backend_from_config(config)?),
        BackendKind::GoogleVision => Box::new(google::backend_from_config(config)?),
        BackendKind::AzureVision => Box::new(azure::backend_from_config(config)?),
    };
    tracing::info!(backend = backend.name(), "recognition backend ready");
    Ok(backend)
}
