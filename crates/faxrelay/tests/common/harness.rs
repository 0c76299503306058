//! Test harness for isolated pipeline runs.
//!
//! Each `TestHarness` owns a temp directory holding a watch directory and a
//! work directory for PDF artifacts, plus a validated config pointing at them.

#![allow(dead_code)]

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tiff::encoder::{colortype, TiffEncoder};

use faxrelay::config::{load_config_from_str_with_env, Config, IN_MEMORY_STATE};
use faxrelay::notify::Notifier;
use faxrelay::pipeline::{EventSink, RecordingSink};
use faxrelay::processor::{DocumentConverter, PdfConverter};
use faxrelay::recognition::{
    PollingBackend, PollingTransport, RecognitionBackend, RecognitionCriteria, SyncBackend,
    SyncTransport,
};
use faxrelay::retry::{Backoff, PollPolicy, RetryPolicy};
use faxrelay::worker::{InMemoryStateStore, JobStateStore, Scheduler};
use faxrelay::{App, Components};

const BASE_CONFIG: &str = r#"
version: "1.0"
watch:
  directory: /placeholder
recognition:
  backend: custom_api
  confidence_threshold: 0.7
  custom_api:
    base_url: https://ocr.example.com
    email: fax@example.com
notification:
  smtp:
    host: smtp.example.com
  from: fax@example.com
  to:
    - office@example.com
"#;

pub struct TestHarness {
    temp_dir: TempDir,
    pub watch_dir: PathBuf,
    pub work_dir: PathBuf,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let watch_dir = temp_dir.path().join("nas");
        let work_dir = temp_dir.path().join("work");
        std::fs::create_dir_all(&watch_dir).unwrap();
        std::fs::create_dir_all(&work_dir).unwrap();

        let mut config =
            load_config_from_str_with_env(BASE_CONFIG, |_| None).expect("base config is valid");
        config.watch.directory = watch_dir.to_string_lossy().to_string();
        config.watch.settle_secs = 0;
        config.watch.poll_interval_secs = 1;
        config.processing.temp_directory = work_dir.to_string_lossy().to_string();
        config.processing.state_file = Some(IN_MEMORY_STATE.to_string());
        config.processing.shutdown_grace_secs = 5;
        config.conversion.retry_delay_ms = 0;
        config.notification.retry_delay_ms = 0;

        Self {
            temp_dir,
            watch_dir,
            work_dir,
            config,
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes a grayscale TIFF with `pages` pages into the watch directory.
    pub fn write_fax(&self, name: &str, pages: usize) -> PathBuf {
        let path = self.watch_dir.join(name);
        std::fs::write(&path, gray_tiff(pages, 64, 48)).unwrap();
        path
    }

    /// Writes a Group 4 (CCITT T.6) TIFF with `pages` pages into the watch
    /// directory.
    pub fn write_g4_fax(&self, name: &str, pages: usize) -> PathBuf {
        let path = self.watch_dir.join(name);
        std::fs::write(&path, g4_tiff(pages)).unwrap();
        path
    }

    /// Writes a file with a fax extension that no decoder accepts.
    pub fn write_garbage(&self, name: &str) -> PathBuf {
        let path = self.watch_dir.join(name);
        std::fs::write(&path, b"this is not an image").unwrap();
        path
    }

    /// Number of entries left in the artifact work directory.
    pub fn leftover_artifacts(&self) -> usize {
        std::fs::read_dir(&self.work_dir).unwrap().count()
    }

    pub fn converter(&self) -> PdfConverter {
        PdfConverter::new(&self.work_dir)
    }

    /// A synchronous backend over `transport` with no retry delay.
    pub fn sync_backend(&self, transport: impl SyncTransport + 'static) -> SyncBackend {
        let retry = RetryPolicy::new(
            self.config.recognition.retry.max_attempts,
            Duration::ZERO,
            Backoff::Exponential,
        );
        SyncBackend::new(
            "scripted",
            Box::new(transport),
            retry,
            RecognitionCriteria::from_config(&self.config.recognition),
        )
    }

    /// An upload-then-poll backend over `transport` that polls without
    /// waiting.
    pub fn polling_backend(
        &self,
        transport: impl PollingTransport + 'static,
        max_polls: u32,
    ) -> PollingBackend {
        PollingBackend::new(
            "custom_api",
            Box::new(transport),
            RetryPolicy::new(
                self.config.recognition.retry.max_attempts,
                Duration::ZERO,
                Backoff::Exponential,
            ),
            PollPolicy::new(max_polls, Duration::ZERO),
            RecognitionCriteria::from_config(&self.config.recognition),
        )
    }

    pub fn scheduler(
        &self,
        converter: Arc<dyn DocumentConverter>,
        backend: Arc<dyn RecognitionBackend>,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn JobStateStore>,
        events: Arc<RecordingSink>,
    ) -> Scheduler {
        let events: Arc<dyn EventSink> = events;
        let components = Components {
            converter,
            backend,
            notifier,
            store,
            events,
        };
        App::with_components(self.config.clone(), components).into_scheduler()
    }

    /// Scheduler with the real PDF converter and an in-memory store.
    pub fn default_scheduler(
        &self,
        backend: Arc<dyn RecognitionBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> (Scheduler, Arc<InMemoryStateStore>, Arc<RecordingSink>) {
        let store = Arc::new(InMemoryStateStore::new());
        let events = Arc::new(RecordingSink::new());
        let scheduler = self.scheduler(
            Arc::new(self.converter()),
            backend,
            notifier,
            store.clone(),
            events.clone(),
        );
        (scheduler, store, events)
    }
}

pub fn gray_tiff(pages: usize, width: u32, height: u32) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buffer).unwrap();
        for page in 0..pages {
            let data: Vec<u8> = (0..width * height)
                .map(|i| ((i as usize * 7 + page * 13) % 256) as u8)
                .collect();
            encoder
                .write_image::<colortype::Gray8>(width, height, &data)
                .unwrap();
        }
    }
    buffer.into_inner()
}

/// Little-endian TIFF whose pages are 16x8 white, Group 4 coded in a single
/// strip: one V0 code per row, then EOFB.
pub fn g4_tiff(pages: usize) -> Vec<u8> {
    const STRIP: [u8; 4] = [0xFF, 0x00, 0x10, 0x01];

    let mut out = b"II*\0\0\0\0\0".to_vec();
    let mut link = 4;
    for _ in 0..pages {
        let strip_offset = out.len() as u32;
        out.extend_from_slice(&STRIP);
        let ifd_offset = out.len() as u32;
        out[link..link + 4].copy_from_slice(&ifd_offset.to_le_bytes());

        let entries: [(u16, u16, u32); 9] = [
            (256, 3, 16),
            (257, 3, 8),
            (258, 3, 1),
            (259, 3, 4),
            (262, 3, 0),
            (273, 4, strip_offset),
            (277, 3, 1),
            (278, 3, 8),
            (279, 4, STRIP.len() as u32),
        ];
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, kind, value) in entries {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&kind.to_le_bytes());
            out.extend_from_slice(&1u32.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        link = out.len();
        out.extend_from_slice(&0u32.to_le_bytes());
    }
    out
}
