//! Wires the configured components into a runnable scheduler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::error::{ConfigError, Result};
use crate::health::HealthReport;
use crate::notify::{Notifier, SmtpNotifier};
use crate::pipeline::{EventSink, Pipeline, PipelineConfig, TracingSink};
use crate::processor::{DocumentConverter, PdfConverter};
use crate::recognition::{build_backend, RecognitionBackend};
use crate::worker::{open_store, FileWatcher, JobStateStore, Scheduler, StabilityGate, WorkerPool};

/// The swappable parts of the pipeline.
pub struct Components {
    pub converter: Arc<dyn DocumentConverter>,
    pub backend: Arc<dyn RecognitionBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn JobStateStore>,
    pub events: Arc<dyn EventSink>,
}

impl Components {
    /// Builds the production components described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let temp_dir = PathBuf::from(&config.processing.temp_directory);
        std::fs::create_dir_all(&temp_dir).map_err(|e| ConfigError::InvalidValue {
            field: "processing.temp_directory".to_string(),
            reason: format!("cannot create {}: {}", temp_dir.display(), e),
        })?;

        let state_path = config.processing.state_path();
        let store = open_store(state_path.as_deref())?;
        match &state_path {
            Some(path) => info!(path = %path.display(), "using durable job state"),
            None => info!("using in-memory job state"),
        }

        Ok(Self {
            converter: Arc::new(PdfConverter::new(temp_dir)),
            backend: Arc::from(build_backend(&config.recognition)?),
            notifier: Arc::new(SmtpNotifier::from_config(&config.notification)?),
            store: Arc::from(store),
            events: Arc::new(TracingSink),
        })
    }
}

pub struct App {
    config: Config,
    components: Components,
}

impl App {
    pub fn build(config: Config) -> Result<Self> {
        let components = Components::from_config(&config)?;
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: Config, components: Components) -> Self {
        Self { config, components }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.components.notifier
    }

    pub fn store(&self) -> &Arc<dyn JobStateStore> {
        &self.components.store
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::run(
            PathBuf::from(&self.config.watch.directory).as_path(),
            self.components.notifier.as_ref(),
        )
    }

    pub fn into_scheduler(self) -> Scheduler {
        let config = self.config;
        let c = self.components;

        let pipeline = Pipeline::new(
            PipelineConfig::from_config(&config),
            c.converter,
            c.backend,
            c.notifier,
            Arc::clone(&c.store),
        )
        .with_events(c.events)
        .with_stability(StabilityGate::new(Duration::ZERO));

        let watcher = FileWatcher::new(
            &config.watch,
            c.store,
            StabilityGate::new(config.watch.settle_interval()),
        )
        .exclude(&config.processing.temp_directory);

        let pool = WorkerPool::new(Arc::new(pipeline), config.processing.concurrency.max(1));

        Scheduler::new(
            watcher,
            pool,
            config.watch.poll_interval(),
            config.processing.shutdown_grace(),
        )
    }
}
