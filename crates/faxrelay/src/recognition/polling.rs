//! Backends that upload a document once and then wait on the returned
//! operation until it settles.

use tracing::{debug, info};

use crate::processor::DocumentArtifact;
use crate::recognition::criteria::RecognitionCriteria;
use crate::recognition::error::RecognitionError;
use crate::recognition::{RawRecognition, RecognitionBackend, RecognitionResult};
use crate::retry::{PollFailure, PollPolicy, PollStatus, RetryFailure, RetryPolicy};

/// Wire operations of a submit-then-poll API.
pub trait PollingTransport: Send + Sync {
    /// Uploads the document and returns the operation handle.
    fn submit(&self, document: &[u8], file_name: &str) -> Result<String, RecognitionError>;

    fn poll(&self, operation: &str) -> Result<PollStatus<RawRecognition>, RecognitionError>;
}

/// Submission is retried with backoff; the operation is then polled under
/// its own budget and never resubmitted.
pub struct PollingBackend {
    name: &'static str,
    transport: Box<dyn PollingTransport>,
    retry: RetryPolicy,
    poll: PollPolicy,
    criteria: RecognitionCriteria,
}

impl PollingBackend {
    pub fn new(
        name: &'static str,
        transport: Box<dyn PollingTransport>,
        retry: RetryPolicy,
        poll: PollPolicy,
        criteria: RecognitionCriteria,
    ) -> Self {
        Self {
            name,
            transport,
            retry,
            poll,
            criteria,
        }
    }
}

impl RecognitionBackend for PollingBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn recognize(
        &self,
        artifact: &DocumentArtifact,
    ) -> Result<RecognitionResult, RecognitionError> {
        let document = artifact.read_bytes()?;
        let file_name = artifact
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "fax.pdf".to_string());

        let (operation, attempts) = self
            .retry
            .run(
                self.name,
                |_| self.transport.submit(&document, &file_name),
                RecognitionError::is_transient,
            )
            .map_err(|failure| match failure {
                RetryFailure::Permanent { error, .. } => error,
                RetryFailure::Exhausted { error, attempts } => RecognitionError::RetriesExhausted {
                    attempts,
                    last: Box::new(error),
                },
            })?;
        info!(backend = self.name, attempts, "document submitted for recognition");

        let (raw, polls) = self
            .poll
            .run(
                self.name,
                |_| self.transport.poll(&operation),
                RecognitionError::is_transient,
            )
            .map_err(|failure| match failure {
                PollFailure::Failed { error, .. } => error,
                PollFailure::TimedOut { polls, .. } => RecognitionError::PollTimeout { polls },
            })?;
        debug!(backend = self.name, polls, "recognition result ready");

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

    #[derive(Default)]
    struct Script {
        submits: VecDeque<Result<String, RecognitionError>>,
        polls: VecDeque<Result<PollStatus<RawRecognition>, RecognitionError>>,
        submit_calls: u32,
        poll_calls: u32,
    }

    #[derive(Clone, Default)]
    struct ScriptedApi(Arc<Mutex<Script>>);

    impl PollingTransport for ScriptedApi {
        fn submit(&self, _: &[u8], _: &str) -> Result<String, RecognitionError> {
            let mut s = self.0.lock().unwrap();
            s.submit_calls += 1;
            s.submits.pop_front().unwrap_or(Ok("token".to_string()))
        }

        fn poll(&self, _: &str) -> Result<PollStatus<RawRecognition>, RecognitionError> {
            let mut s = self.0.lock().unwrap();
            s.poll_calls += 1;
            s.polls.pop_front().unwrap_or(Ok(PollStatus::Pending))
        }
    }

    fn ready(text: &str, confidence: f32) -> Result<PollStatus<RawRecognition>, RecognitionError> {
        Ok(PollStatus::Ready(RawRecognition {
            text: text.to_string(),
            confidence,
            language: None,
        }))
    }

    fn backend(api: &ScriptedApi, max_polls: u32) -> PollingBackend {
        PollingBackend::new(
            "scripted",
            Box::new(api.clone()),
            RetryPolicy::new(3, Duration::ZERO, Backoff::Exponential),
            PollPolicy::new(max_polls, Duration::ZERO),
            RecognitionCriteria {
                confidence_threshold: 0.7,
                expected_language: None,
                min_text_chars: 5,
            },
        )
    }

    fn artifact() -> (tempfile::TempDir, DocumentArtifact) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut tmp = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
        std::io::Write::write_all(&mut tmp, b"%PDF-1.5").unwrap();
        (dir, DocumentArtifact::new(tmp.into_temp_path(), 1, true))
    }

    #[test]
    fn test_ready_after_pending_polls() {
        let api = ScriptedApi::default();
        {
            let mut s = api.0.lock().unwrap();
            for _ in 0..4 {
                s.polls.push_back(Ok(PollStatus::Pending));
            }
            s.polls.push_back(ready("Order sheet 12 items", 1.0));
        }
        let (_dir, artifact) = artifact();

        let result = backend(&api, 5).recognize(&artifact).unwrap();
        assert_eq!(result.text, "Order sheet 12 items");
        assert_eq!(api.0.lock().unwrap().poll_calls, 5);
        assert_eq!(api.0.lock().unwrap().submit_calls, 1);
    }

    #[test]
    fn test_pending_for_all_polls_times_out() {
        let api = ScriptedApi::default();
        let (_dir, artifact) = artifact();

        let err = backend(&api, 5).recognize(&artifact).unwrap_err();
        assert!(matches!(err, RecognitionError::PollTimeout { polls: 5 }));
        assert_eq!(api.0.lock().unwrap().poll_calls, 5);
        assert_eq!(api.0.lock().unwrap().submit_calls, 1);
    }

    #[test]
    fn test_terminal_poll_error_stops_polling() {
        let api = ScriptedApi::default();
        api.0.lock().unwrap().polls.extend([
            Ok(PollStatus::Pending),
            Err(RecognitionError::ServerRejected {
                message: "false".to_string(),
            }),
        ]);
        let (_dir, artifact) = artifact();

        let err = backend(&api, 30).recognize(&artifact).unwrap_err();
        assert!(matches!(err, RecognitionError::ServerRejected { .. }));
        assert_eq!(api.0.lock().unwrap().poll_calls, 2);
    }

    #[test]
    fn test_submission_retried_on_transient_failure() {
        let api = ScriptedApi::default();
        {
            let mut s = api.0.lock().unwrap();
            s.submits.extend([
                Err(RecognitionError::transient("HTTP 503")),
                Err(RecognitionError::transient("connection reset")),
                Ok("tok".to_string()),
            ]);
            s.polls.push_back(ready("Delivery note", 1.0));
        }
        let (_dir, artifact) = artifact();

        let result = backend(&api, 3).recognize(&artifact).unwrap();
        assert_eq!(result.attempts, 3);
        assert_eq!(api.0.lock().unwrap().submit_calls, 3);
    }

    #[test]
    fn test_submission_exhausted() {
        let api = ScriptedApi::default();
        api.0.lock().unwrap().submits.extend([
            Err(RecognitionError::transient("HTTP 503")),
            Err(RecognitionError::transient("HTTP 503")),
            Err(RecognitionError::transient("HTTP 503")),
        ]);
        let (_dir, artifact) = artifact();

        let err = backend(&api, 3).recognize(&artifact).unwrap_err();
        assert!(matches!(
            err,
            RecognitionError::RetriesExhausted { attempts: 3, .. }
        ));
        assert_eq!(api.0.lock().unwrap().poll_calls, 0);
    }

    #[test]
    fn test_auth_failure_not_retried() {
        let api = ScriptedApi::default();
        api.0
            .lock()
            .unwrap()
            .submits
            .push_back(Err(RecognitionError::Authentication {
                status: 401,
                message: String::new(),
            }));
        let (_dir, artifact) = artifact();

        let err = backend(&api, 3).recognize(&artifact).unwrap_err();
        assert!(matches!(err, RecognitionError::Authentication { .. }));
        assert_eq!(api.0.lock().unwrap().submit_calls, 1);
    }

    #[test]
    fn test_ready_result_still_checked_against_threshold() {
        let api = ScriptedApi::default();
        api.0
            .lock()
            .unwrap()
            .polls
            .push_back(ready("Smudged page text", 0.3));
        let (_dir, artifact) = artifact();

        let err = backend(&api, 3).recognize(&artifact).unwrap_err();
        assert!(matches!(err, RecognitionError::LowConfidence { .. }));
        assert_eq!(api.0.lock().unwrap().submit_calls, 1);
    }
}
