//! Environment variable overrides.
//!
//! Deployments inherited a set of flat variable names (`NAS_WATCH_DIRECTORY`,
//! `SMTP_SERVER`, ...) that take precedence over the YAML file. Credentials
//! are never copied out of the environment; the matching [`SecretSource`]
//! is pointed at the variable instead.

use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{
    AzureVisionConfig, BackendKind, Config, CustomApiConfig, GoogleVisionConfig,
};
use crate::error::ConfigError;
use crate::secrets::SecretSource;

/// Loads `KEY=VALUE` pairs from an env file into the process environment.
///
/// A missing file is not an error; returns whether a file was read.
pub fn load_env_file(path: Option<&Path>) -> Result<bool, ConfigError> {
    let result = match path {
        Some(path) => dotenvy::from_path(path).map(|_| true),
        None => dotenvy::dotenv().map(|_| true),
    };

    match result {
        Ok(loaded) => Ok(loaded),
        Err(dotenvy::Error::Io(_)) => Ok(false),
        Err(e) => Err(ConfigError::EnvFile {
            path: path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| ".env".into()),
            reason: e.to_string(),
        }),
    }
}

/// Applies overrides from an arbitrary lookup (tests pass a map).
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(dir) = get("NAS_WATCH_DIRECTORY") {
        config.watch.directory = dir;
    }
    if let Some(dir) = get("TEMP_DIRECTORY") {
        config.processing.temp_directory = dir;
    }
    if let Some(level) = get("LOG_LEVEL") {
        config.logging.level = level.to_lowercase();
    }

    let recognition = &mut config.recognition;
    if let Some(kind) = get("OCR_API_TYPE") {
        recognition.backend =
            BackendKind::from_str(&kind).map_err(|reason| ConfigError::InvalidValue {
                field: "OCR_API_TYPE".to_string(),
                reason,
            })?;
    }

    if let Some(url) = get("OCR_API_BASE_URL") {
        custom_section(&mut recognition.custom_api).base_url = url;
    }
    if let Some(email) = get("OCR_API_EMAIL") {
        custom_section(&mut recognition.custom_api).email = email;
    }
    if let Some(polls) = get("OCR_MAX_RETRIES") {
        custom_section(&mut recognition.custom_api).max_polls = parse("OCR_MAX_RETRIES", &polls)?;
    }
    if let Some(interval) = get("OCR_RETRY_INTERVAL") {
        custom_section(&mut recognition.custom_api).poll_interval_secs =
            parse("OCR_RETRY_INTERVAL", &interval)?;
    }

    if get("GOOGLE_VISION_API_KEY").is_some() {
        recognition
            .google_vision
            .get_or_insert_with(GoogleVisionConfig::default)
            .api_key = SecretSource::from_env("GOOGLE_VISION_API_KEY");
    }
    if let Some(endpoint) = get("AZURE_VISION_ENDPOINT") {
        recognition
            .azure_vision
            .get_or_insert_with(AzureVisionConfig::default)
            .endpoint = endpoint;
    }
    if get("AZURE_VISION_KEY").is_some() {
        recognition
            .azure_vision
            .get_or_insert_with(AzureVisionConfig::default)
            .key = SecretSource::from_env("AZURE_VISION_KEY");
    }

    let notification = &mut config.notification;
    if let Some(host) = get("SMTP_SERVER") {
        notification.smtp.host = host;
    }
    if let Some(port) = get("SMTP_PORT") {
        notification.smtp.port = parse("SMTP_PORT", &port)?;
    }
    if let Some(username) = get("SMTP_USERNAME") {
        notification.smtp.username = username;
    }
    if get("SMTP_PASSWORD").is_some() {
        notification.smtp.password = SecretSource::from_env("SMTP_PASSWORD");
    }
    if let Some(from) = get("MAIL_FROM") {
        notification.from = from;
    }
    if let Some(to) = get("MAIL_TO") {
        notification.to = to
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }

    Ok(())
}

fn custom_section(section: &mut Option<CustomApiConfig>) -> &mut CustomApiConfig {
    section.get_or_insert_with(CustomApiConfig::default)
}

fn parse<T>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}': {}", raw, e),
        })
}
