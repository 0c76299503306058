#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use faxrelay::error::ConversionError;
use faxrelay::notify::{MessageKind, NotificationError, Notifier, OutboundMessage};
use faxrelay::processor::{DocumentArtifact, DocumentConverter};
use faxrelay::recognition::{
    PollingTransport, RawRecognition, RecognitionBackend, RecognitionError, RecognitionResult,
    SyncTransport, TextStats,
};
use faxrelay::retry::PollStatus;
use faxrelay::worker::FileHandle;

pub fn raw(text: &str, confidence: f32, language: Option<&str>) -> RawRecognition {
    RawRecognition {
        text: text.to_string(),
        confidence,
        language: language.map(str::to_string),
    }
}

pub fn transient(message: &str) -> RecognitionError {
    RecognitionError::Transient {
        message: message.to_string(),
    }
}

/// Replays queued responses; the last one repeats once the queue is drained.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RawRecognition, RecognitionError>>>,
    fallback: RawRecognition,
    pub calls: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn always(response: RawRecognition) -> Self {
        Self::scripted(Vec::new(), response)
    }

    pub fn scripted(
        responses: Vec<Result<RawRecognition, RecognitionError>>,
        fallback: RawRecognition,
    ) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SyncTransport for ScriptedTransport {
    fn recognize(
        &self,
        document: &[u8],
        page_count: usize,
    ) -> Result<RawRecognition, RecognitionError> {
        assert!(document.starts_with(b"%PDF"), "transport expects a PDF");
        assert!(page_count >= 1);
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(self.fallback.clone()),
        }
    }
}

/// Upload-then-poll API that answers "still working" for the first
/// `pending_polls` checks of each upload, then returns `result`.
pub struct ScriptedPollingApi {
    pending_polls: usize,
    result: RawRecognition,
    pub submits: Arc<AtomicUsize>,
    pub polls: Arc<AtomicUsize>,
}

impl ScriptedPollingApi {
    pub fn new(pending_polls: usize, result: RawRecognition) -> Self {
        Self {
            pending_polls,
            result,
            submits: Arc::new(AtomicUsize::new(0)),
            polls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl PollingTransport for ScriptedPollingApi {
    fn submit(&self, document: &[u8], file_name: &str) -> Result<String, RecognitionError> {
        assert!(document.starts_with(b"%PDF"), "upload expects a PDF");
        assert!(file_name.ends_with(".pdf"));
        let n = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("tmp-{}", n))
    }

    fn poll(&self, operation: &str) -> Result<PollStatus<RawRecognition>, RecognitionError> {
        assert!(operation.starts_with("tmp-"));
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.pending_polls {
            Ok(PollStatus::Pending)
        } else {
            Ok(PollStatus::Ready(self.result.clone()))
        }
    }
}

/// Accepts every document after a delay, tracking peak parallelism.
pub struct SlowBackend {
    delay: Duration,
    in_flight: AtomicUsize,
    pub peak: Arc<AtomicUsize>,
}

impl SlowBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl RecognitionBackend for SlowBackend {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn recognize(&self, _: &DocumentArtifact) -> Result<RecognitionResult, RecognitionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = "Order confirmation 1234";
        Ok(RecognitionResult {
            text: text.to_string(),
            confidence: 0.95,
            language: Some("en".to_string()),
            language_valid: true,
            stats: TextStats::from_text(text),
            attempts: 1,
        })
    }
}

/// Delegates to a real converter and counts calls.
pub struct CountingConverter<C> {
    inner: C,
    pub calls: Arc<AtomicUsize>,
}

impl<C> CountingConverter<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl<C: DocumentConverter> DocumentConverter for CountingConverter<C> {
    fn convert(&self, handle: &FileHandle) -> Result<DocumentArtifact, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.convert(handle)
    }
}

/// Captures outgoing messages instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, kind: MessageKind) -> usize {
        self.sent().iter().filter(|m| m.kind == kind).count()
    }
}

impl Notifier for RecordingNotifier {
    fn deliver(&self, message: &OutboundMessage) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    fn self_test(&self) -> Result<(), NotificationError> {
        Ok(())
    }
}
