use thiserror::Error;

use crate::error::ConversionError;
use crate::recognition::RecognitionError;
use crate::worker::job::FailureKind;

/// A stage failure after that stage's own retries are spent.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Conversion(_) => FailureKind::Conversion,
            Self::Recognition(e) => e.classify(),
            Self::Internal(_) => FailureKind::Internal,
        }
    }
}
