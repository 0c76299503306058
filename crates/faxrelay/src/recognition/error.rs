use thiserror::Error;

use crate::worker::job::FailureKind;

#[derive(Error, Debug)]
pub enum RecognitionError {
    /// Network failure, timeout, rate limiting or a 5xx response.
    #[error("Transient recognition failure: {message}")]
    Transient { message: String },

    #[error("Recognition failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RecognitionError>,
    },

    #[error("Recognition result still pending after {polls} poll(s)")]
    PollTimeout { polls: u32 },

    #[error("Recognition service rejected the job: {message}")]
    ServerRejected { message: String },

    #[error("Recognition service refused credentials (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Recognition request rejected (HTTP {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Malformed recognition response: {0}")]
    MalformedResponse(String),

    #[error("Recognition confidence {confidence:.2} is below threshold {threshold:.2}")]
    LowConfidence { confidence: f32, threshold: f32 },

    #[error("Recognized language '{detected}' does not match expected '{expected}'")]
    LanguageMismatch { expected: String, detected: String },

    #[error("Recognized text too short: {chars} character(s), need {min}")]
    TextTooShort { chars: usize, min: usize },

    #[error("Failed to read document artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl RecognitionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Failure class reported in alerts. Retry and poll exhaustion are kept
    /// apart from outright rejections.
    pub fn classify(&self) -> FailureKind {
        match self {
            Self::Transient { .. } | Self::RetriesExhausted { .. } | Self::PollTimeout { .. } => {
                FailureKind::RecognitionTransient
            }
            _ => FailureKind::RecognitionRejected,
        }
    }
}
