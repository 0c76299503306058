use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaxRelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Recognition error: {0}")]
    Recognition(#[from] crate::recognition::RecognitionError),

    #[error("Notification error: {0}")]
    Notification(#[from] crate::notify::NotificationError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Failed to convert config to JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to load environment file '{path}': {reason}")]
    EnvFile { path: PathBuf, reason: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Missing required setting '{0}'")]
    Missing(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Secret resolution failed for '{field}': {source}")]
    Secret {
        field: String,
        #[source]
        source: crate::secrets::SecretError,
    },
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Failed to read source image '{path}': {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Unsupported pixel layout: {0}")]
    UnsupportedPixels(String),

    #[error("Source image contains no pages")]
    NoPages,

    #[error("Failed to build PDF: {0}")]
    PdfBuild(String),

    #[error("Failed to write artifact '{path}': {source}")]
    WriteArtifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact failed validation: {0}")]
    Validation(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to read state file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file '{path}': {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("State store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Watch directory '{path}' is not accessible: {source}")]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },


    #[error("Workers did not stop within {0:?}")]
    ShutdownTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, FaxRelayError>;
