use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::secrets::SecretSource;

/// Sentinel `processing.state_file` value that keeps job state in memory only.
pub const IN_MEMORY_STATE: &str = "memory";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub directory: String,
    pub extensions: Vec<String>,
    pub lookback_minutes: u64,
    pub recursive: bool,
    pub poll_interval_secs: u64,
    pub settle_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            directory: String::new(),
            extensions: vec!["tif".to_string(), "tiff".to_string()],
            lookback_minutes: 10,
            recursive: true,
            poll_interval_secs: 600,
            settle_secs: 5,
        }
    }
}

impl WatchConfig {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_minutes.saturating_mul(60))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub concurrency: usize,
    pub temp_directory: String,
    /// Path of the durable job state file. `None` uses the platform data
    /// directory; [`IN_MEMORY_STATE`] disables persistence.
    pub state_file: Option<String>,
    pub shutdown_grace_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            temp_directory: "./temp".to_string(),
            state_file: None,
            shutdown_grace_secs: 30,
        }
    }
}

impl ProcessingConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Resolves where job state lives. `None` means in-memory.
    pub fn state_path(&self) -> Option<PathBuf> {
        match self.state_file.as_deref() {
            Some(IN_MEMORY_STATE) => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(default_state_path()),
        }
    }
}

fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|p| p.join("faxrelay").join("job-state.json"))
        .unwrap_or_else(|| PathBuf::from("./faxrelay-job-state.json"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    CustomApi,
    GoogleVision,
    AzureVision,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "custom_api" => Ok(Self::CustomApi),
            "google_vision" => Ok(Self::GoogleVision),
            "azure_vision" => Ok(Self::AzureVision),
            other => Err(format!("unsupported recognition backend '{}'", other)),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CustomApi => write!(f, "custom_api"),
            Self::GoogleVision => write!(f, "google_vision"),
            Self::AzureVision => write!(f, "azure_vision"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub backend: BackendKind,
    pub retry: BackoffConfig,
    pub confidence_threshold: f32,
    /// BCP-47 primary language expected in recognized text (e.g. `ja`).
    pub expected_language: Option<String>,
    pub min_text_chars: usize,
    pub request_timeout_secs: u64,
    pub custom_api: Option<CustomApiConfig>,
    pub google_vision: Option<GoogleVisionConfig>,
    pub azure_vision: Option<AzureVisionConfig>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::CustomApi,
            retry: BackoffConfig::default(),
            confidence_threshold: 0.7,
            expected_language: None,
            min_text_chars: 5,
            request_timeout_secs: 30,
            custom_api: None,
            google_vision: None,
            azure_vision: None,
        }
    }
}

impl RecognitionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomApiConfig {
    pub base_url: String,
    pub email: String,
    pub max_polls: u32,
    pub poll_interval_secs: u64,
}

impl Default for CustomApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            email: String::new(),
            max_polls: 30,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleVisionConfig {
    pub api_key: SecretSource,
    pub endpoint: String,
    pub language_hints: Vec<String>,
}

impl Default for GoogleVisionConfig {
    fn default() -> Self {
        Self {
            api_key: SecretSource::default(),
            endpoint: "https://vision.googleapis.com/v1/files:annotate".to_string(),
            language_hints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureVisionConfig {
    pub endpoint: String,
    pub key: SecretSource,
    pub max_polls: u32,
    pub poll_interval_secs: u64,
}

impl Default for AzureVisionConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key: SecretSource::default(),
            max_polls: 60,
            poll_interval_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    StartTls,
    Tls,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretSource,
    pub security: SmtpSecurity,
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 587,
            username: String::new(),
            password: SecretSource::default(),
            security: SmtpSecurity::StartTls,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub smtp: SmtpConfig,
    pub from: String,
    pub to: Vec<String>,
    pub subject_template: String,
    pub failure_subject_template: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            smtp: SmtpConfig::default(),
            from: String::new(),
            to: Vec::new(),
            subject_template: "Fax received - {filename}".to_string(),
            failure_subject_template: "Fax processing error - {filename}".to_string(),
            max_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `info,faxrelay=debug`.
    pub level: String,
    pub format: LogFormat,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}
