use tracing::info;

use crate::processor::DocumentArtifact;
use crate::recognition::criteria::RecognitionCriteria;
use crate::recognition::error::RecognitionError;
use crate::recognition::{RawRecognition, RecognitionBackend, RecognitionResult};
use crate::retry::{RetryFailure, RetryPolicy};

/// A vendor API that answers in the same request. `page_count` lets a
/// transport split documents the vendor only accepts in page batches.
pub trait SyncTransport: Send + Sync {
    fn recognize(
        &self,
        document: &[u8],
        page_count: usize,
    ) -> Result<RawRecognition, RecognitionError>;
}

/// Wraps a synchronous transport with transient retry and result evaluation.
pub struct SyncBackend {
    name: &'static str,
    transport: Box<dyn SyncTransport>,
    retry: RetryPolicy,
    criteria: RecognitionCriteria,
}

impl SyncBackend {
    pub fn new(
        name: &'static str,
        transport: Box<dyn SyncTransport>,
        retry: RetryPolicy,
        criteria: RecognitionCriteria,
    ) -> Self {
        Self {
            name,
            transport,
            retry,
            criteria,
        }
    }
}

impl RecognitionBackend for SyncBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn recognize(
        &self,
        artifact: &DocumentArtifact,
    ) -> Result<RecognitionResult, RecognitionError> {
        let document = artifact.read_bytes()?;

        let (raw, attempts) = self
            .retry
            .run(
                self.name,
                |_| self.transport.recognize(&document, artifact.page_count),
                RecognitionError::is_transient,
            )
            .map_err(|failure| match failure {
                RetryFailure::Permanent { error, .. } => error,
                RetryFailure::Exhausted { error, attempts } => RecognitionError::RetriesExhausted {
                    attempts,
                    last: Box::new(error),
                },
            })?;

        info!(
            backend = self.name,
            attempts,
            confidence = raw.confidence,
            "recognition call succeeded"
        );
        self.criteria.check(raw, attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Scripted {
        responses: Arc<Mutex<VecDeque<Result<RawRecognition, RecognitionError>>>>,
        calls: Arc<Mutex<u32>>,
    }

    impl SyncTransport for Scripted {
        fn recognize(&self, _: &[u8], _: usize) -> Result<RawRecognition, RecognitionError> {
            *self.calls.lock().unwrap() += 1;
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RecognitionError::transient("no response scripted")))
        }
    }

    fn backend(transport: &Scripted) -> SyncBackend {
        SyncBackend::new(
            "scripted",
            Box::new(transport.clone()),
            RetryPolicy::new(3, Duration::ZERO, Backoff::Exponential),
            RecognitionCriteria {
                confidence_threshold: 0.7,
                expected_language: None,
                min_text_chars: 5,
            },
        )
    }

    fn artifact() -> (tempfile::TempDir, DocumentArtifact) {
        let dir = tempfile::TempDir::new().unwrap();
        let tmp = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        (dir, DocumentArtifact::new(tmp.into_temp_path(), 1, true))
    }

    fn ok(text: &str, confidence: f32) -> Result<RawRecognition, RecognitionError> {
        Ok(RawRecognition {
            text: text.to_string(),
            confidence,
            language: None,
        })
    }

    #[test]
    fn test_success_after_two_transient_failures() {
        let transport = Scripted::default();
        transport.responses.lock().unwrap().extend([
            Err(RecognitionError::transient("HTTP 429")),
            Err(RecognitionError::transient("HTTP 502")),
            ok("Purchase order 7781", 0.88),
        ]);
        let (_dir, artifact) = artifact();

        let result = backend(&transport).recognize(&artifact).unwrap();
        assert_eq!(result.text, "Purchase order 7781");
        assert_eq!(result.attempts, 3);
    }

    #[test]
    fn test_three_transient_failures_exhaust() {
        let transport = Scripted::default();
        let (_dir, artifact) = artifact();

        let err = backend(&transport).recognize(&artifact).unwrap_err();
        assert!(matches!(
            err,
            RecognitionError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(*transport.calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_low_confidence_is_not_retried() {
        let transport = Scripted::default();
        transport
            .responses
            .lock()
            .unwrap()
            .push_back(ok("Blurry page text", 0.41));
        let (_dir, artifact) = artifact();

        let err = backend(&transport).recognize(&artifact).unwrap_err();
        assert!(matches!(err, RecognitionError::LowConfidence { .. }));
        assert_eq!(*transport.calls.lock().unwrap(), 1);
    }
}
