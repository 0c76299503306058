use std::path::Path;

use lettre::message::Mailbox;
use reqwest::Url;

use crate::config::env::apply_env_overrides;
use crate::config::schema::{BackendKind, Config};
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Reads a YAML config file, overlays the process environment and validates
/// the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    load_config_from_str_with_env(content, |key| std::env::var(key).ok())
}

/// Same as [`load_config_from_str`] with an explicit environment lookup.
pub fn load_config_from_str_with_env<F>(content: &str, lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(content)?;
    let json_value: serde_json::Value = serde_json::to_value(yaml_value)?;

    validate_schema(&json_value)?;

    let mut config: Config = serde_json::from_value(json_value)?;
    apply_env_overrides(&mut config, lookup)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express. Runs after env overrides so
/// values supplied only through the environment are covered too.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let watch = &config.watch;
    if watch.directory.trim().is_empty() {
        return Err(ConfigError::Missing("watch.directory".to_string()));
    }
    if watch.extensions.iter().all(|e| e.trim().is_empty()) {
        return Err(invalid("watch.extensions", "at least one extension is required"));
    }
    if watch.poll_interval_secs == 0 {
        return Err(invalid("watch.poll_interval_secs", "must be greater than zero"));
    }

    if config.processing.concurrency == 0 {
        return Err(invalid("processing.concurrency", "must be at least 1"));
    }
    if config.conversion.max_attempts == 0 {
        return Err(invalid("conversion.max_attempts", "must be at least 1"));
    }

    validate_recognition(config)?;
    validate_notification(config)?;

    Ok(())
}

fn validate_recognition(config: &Config) -> Result<(), ConfigError> {
    let recognition = &config.recognition;
    if recognition.retry.max_attempts == 0 {
        return Err(invalid("recognition.retry.max_attempts", "must be at least 1"));
    }
    if recognition.retry.max_delay_ms < recognition.retry.base_delay_ms {
        return Err(invalid(
            "recognition.retry.max_delay_ms",
            "must not be smaller than base_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&recognition.confidence_threshold) {
        return Err(invalid(
            "recognition.confidence_threshold",
            "must be between 0.0 and 1.0",
        ));
    }

    match recognition.backend {
        BackendKind::CustomApi => {
            let custom = recognition
                .custom_api
                .as_ref()
                .ok_or_else(|| ConfigError::Missing("recognition.custom_api".to_string()))?;
            validate_url("recognition.custom_api.base_url", &custom.base_url)?;
            if custom.email.trim().is_empty() {
                return Err(ConfigError::Missing(
                    "recognition.custom_api.email".to_string(),
                ));
            }
            if custom.max_polls == 0 {
                return Err(invalid("recognition.custom_api.max_polls", "must be at least 1"));
            }
        }
        BackendKind::GoogleVision => {
            let google = recognition
                .google_vision
                .as_ref()
                .ok_or_else(|| ConfigError::Missing("recognition.google_vision".to_string()))?;
            validate_url("recognition.google_vision.endpoint", &google.endpoint)?;
            if !google.api_key.is_configured() {
                return Err(ConfigError::Missing(
                    "recognition.google_vision.api_key".to_string(),
                ));
            }
        }
        BackendKind::AzureVision => {
            let azure = recognition
                .azure_vision
                .as_ref()
                .ok_or_else(|| ConfigError::Missing("recognition.azure_vision".to_string()))?;
            validate_url("recognition.azure_vision.endpoint", &azure.endpoint)?;
            if !azure.key.is_configured() {
                return Err(ConfigError::Missing(
                    "recognition.azure_vision.key".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_notification(config: &Config) -> Result<(), ConfigError> {
    let notification = &config.notification;
    if notification.smtp.host.trim().is_empty() {
        return Err(ConfigError::Missing("notification.smtp.host".to_string()));
    }
    if !notification.smtp.username.is_empty() && !notification.smtp.password.is_configured() {
        return Err(ConfigError::Missing(
            "notification.smtp.password".to_string(),
        ));
    }
    if notification.max_attempts == 0 {
        return Err(invalid("notification.max_attempts", "must be at least 1"));
    }

    validate_mailbox("notification.from", &notification.from)?;
    if notification.to.is_empty() {
        return Err(ConfigError::Missing("notification.to".to_string()));
    }
    for address in &notification.to {
        validate_mailbox("notification.to", address)?;
    }

    Ok(())
}

fn validate_url(field: &str, raw: &str) -> Result<(), ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::Missing(field.to_string()));
    }
    let url = Url::parse(raw).map_err(|e| invalid(field, &e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(field, &format!("unsupported scheme '{}'", other))),
    }
}

fn validate_mailbox(field: &str, raw: &str) -> Result<(), ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::Missing(field.to_string()));
    }
    raw.parse::<Mailbox>()
        .map(|_| ())
        .map_err(|e| invalid(field, &format!("'{}': {}", raw, e)))
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
version: "1.0"
watch:
  directory: /mnt/nas/fax
recognition:
  backend: custom_api
  custom_api:
    base_url: https://ocr.example.com
    email: fax@example.com
notification:
  smtp:
    host: smtp.example.com
    username: relay
    password:
      value: secret
  from: fax@example.com
  to:
    - office@example.com
"#;

    fn load(content: &str) -> Result<Config, ConfigError> {
        load_config_from_str_with_env(content, |_| None)
    }

    #[test]
    fn test_load_valid_config() {
        let config = load(VALID).unwrap();
        assert_eq!(config.watch.directory, "/mnt/nas/fax");
        assert_eq!(config.watch.extensions, vec!["tif", "tiff"]);
        assert_eq!(config.processing.concurrency, 3);
        assert_eq!(config.notification.smtp.port, 587);
        assert_eq!(
            config.recognition.custom_api.as_ref().unwrap().max_polls,
            30
        );
    }

    #[test]
    fn test_invalid_version() {
        let content = VALID.replace("version: \"1.0\"", "version: \"2.0\"");
        let result = load(&content);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_top_level_key_fails_schema() {
        let content = format!("{}\nunexpected: true\n", VALID);
        let result = load(&content);
        assert!(matches!(result, Err(ConfigError::SchemaValidation { .. })));
    }

    #[test]
    fn test_missing_watch_directory() {
        let content = VALID.replace("  directory: /mnt/nas/fax\n", "  recursive: true\n");
        let result = load(&content);
        assert!(matches!(result, Err(ConfigError::Missing(ref f)) if f == "watch.directory"));
    }

    #[test]
    fn test_watch_directory_from_env() {
        let content = VALID.replace("  directory: /mnt/nas/fax\n", "  recursive: true\n");
        let config = load_config_from_str_with_env(&content, |key| {
            (key == "NAS_WATCH_DIRECTORY").then(|| "/srv/fax".to_string())
        })
        .unwrap();
        assert_eq!(config.watch.directory, "/srv/fax");
    }

    #[test]
    fn test_selected_backend_section_required() {
        let content = VALID.replace("backend: custom_api", "backend: azure_vision");
        let result = load(&content);
        assert!(
            matches!(result, Err(ConfigError::Missing(ref f)) if f == "recognition.azure_vision")
        );
    }

    #[test]
    fn test_threshold_out_of_range() {
        let content = VALID.replace(
            "  backend: custom_api\n",
            "  backend: custom_api\n  confidence_threshold: 1.5\n",
        );
        let result = load(&content);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_recipient() {
        let content = VALID.replace("office@example.com", "not an address");
        let result = load(&content);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue { ref field, .. }) if field == "notification.to")
        );
    }

    #[test]
    fn test_username_requires_password() {
        let content = VALID.replace("    password:\n      value: secret\n", "");
        let result = load(&content);
        assert!(
            matches!(result, Err(ConfigError::Missing(ref f)) if f == "notification.smtp.password")
        );
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let content = format!("{}processing:\n  concurrency: 0\n", VALID);
        let result = load(&content);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let result = load("version: [unterminated");
        assert!(matches!(result, Err(ConfigError::ParseYaml(_))));
    }
}
