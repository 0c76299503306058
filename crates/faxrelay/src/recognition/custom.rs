//! Transport for the in-house recognition API: multipart upload, then
//! form-encoded result polling.

use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde::Deserialize;

use crate::config::{CustomApiConfig, RecognitionConfig};
use crate::error::ConfigError;
use crate::recognition::criteria::RecognitionCriteria;
use crate::recognition::error::RecognitionError;
use crate::recognition::http::{build_client, classify_transport, parse_json, read_success_text};
use crate::recognition::polling::{PollingBackend, PollingTransport};
use crate::recognition::RawRecognition;
use crate::retry::{PollPolicy, PollStatus, RetryPolicy};

const PENDING: &str = "working";
const REJECTED: &str = "false";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    tempfile: Option<String>,
}

pub struct HttpCustomApi {
    client: Client,
    base_url: String,
    email: String,
}

impl HttpCustomApi {
    pub fn new(config: &CustomApiConfig, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
        })
    }
}

/// Interprets the body of a `/result` response.
pub fn parse_poll_body(body: &str) -> Result<PollStatus<String>, RecognitionError> {
    match body.trim() {
        PENDING => Ok(PollStatus::Pending),
        REJECTED => Err(RecognitionError::ServerRejected {
            message: "job unknown or already collected".to_string(),
        }),
        _ => Ok(PollStatus::Ready(body.to_string())),
    }
}

// The API does not report confidence.
fn into_raw(text: String) -> RawRecognition {
    RawRecognition {
        text,
        confidence: 1.0,
        language: None,
    }
}

impl PollingTransport for HttpCustomApi {
    fn submit(&self, document: &[u8], file_name: &str) -> Result<String, RecognitionError> {
        let part = Part::bytes(document.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(classify_transport)?;
        let form = Form::new()
            .text("email", self.email.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .multipart(form)
            .send()
            .map_err(classify_transport)?;
        let body = read_success_text(response)?;

        let upload: UploadResponse = parse_json(&body)?;
        upload
            .tempfile
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                RecognitionError::MalformedResponse("upload response has no tempfile".to_string())
            })
    }

    fn poll(&self, token: &str) -> Result<PollStatus<RawRecognition>, RecognitionError> {
        let response = self
            .client
            .post(format!("{}/result", self.base_url))
            .form(&[("tempfile", token)])
            .send()
            .map_err(classify_transport)?;
        let body = read_success_text(response)?;
        Ok(match parse_poll_body(&body)? {
            PollStatus::Pending => PollStatus::Pending,
            PollStatus::Ready(text) => PollStatus::Ready(into_raw(text)),
        })
    }
}

/// Builds the custom backend from `recognition.custom_api`.
pub fn backend_from_config(config: &RecognitionConfig) -> Result<PollingBackend, ConfigError> {
    let custom = config
        .custom_api
        .as_ref()
        .ok_or_else(|| ConfigError::Missing("recognition.custom_api".to_string()))?;
    let transport = HttpCustomApi::new(custom, config.request_timeout())?;
    Ok(PollingBackend::new(
        "custom_api",
        Box::new(transport),
        RetryPolicy::recognition(&config.retry),
        PollPolicy::new(
            custom.max_polls,
            Duration::from_secs(custom.poll_interval_secs),
        ),
        RecognitionCriteria::from_config(config),
    ))
}
