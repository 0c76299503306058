//! Azure AI Vision Read v3.2 transport: the PDF is posted to `read/analyze`
//! and the returned `Operation-Location` is polled until the read settles.

use std::time::Duration;

use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::{AzureVisionConfig, RecognitionConfig};
use crate::error::ConfigError;
use crate::recognition::criteria::RecognitionCriteria;
use crate::recognition::error::RecognitionError;
use crate::recognition::http::{
    build_client, classify_transport, ensure_success, parse_json, read_success_text,
};
use crate::recognition::polling::{PollingBackend, PollingTransport};
use crate::recognition::RawRecognition;
use crate::retry::{PollPolicy, PollStatus, RetryPolicy};

const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_HEADER: &str = "Operation-Location";

pub struct AzureReadTransport {
    client: Client,
    url: String,
    key: SecretString,
}

impl AzureReadTransport {
    pub fn new(config: &AzureVisionConfig, timeout: Duration) -> Result<Self, ConfigError> {
        let key = config.key.resolve().map_err(|source| ConfigError::Secret {
            field: "recognition.azure_vision.key".to_string(),
            source,
        })?;
        Ok(Self {
            client: build_client(timeout)?,
            url: read_url(&config.endpoint),
            key,
        })
    }
}

pub fn read_url(endpoint: &str) -> String {
    format!(
        "{}/vision/v3.2/read/analyze",
        endpoint.trim_end_matches('/')
    )
}

impl PollingTransport for AzureReadTransport {
    fn submit(&self, document: &[u8], _file_name: &str) -> Result<String, RecognitionError> {
        let response = self
            .client
            .post(&self.url)
            .header(SUBSCRIPTION_HEADER, self.key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(document.to_vec())
            .send()
            .map_err(classify_transport)?;
        let response = ensure_success(response)?;

        response
            .headers()
            .get(OPERATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.trim().to_string())
            .ok_or_else(|| {
                RecognitionError::MalformedResponse(format!(
                    "read response has no {} header",
                    OPERATION_HEADER
                ))
            })
    }

    fn poll(&self, operation: &str) -> Result<PollStatus<RawRecognition>, RecognitionError> {
        let response = self
            .client
            .get(operation)
            .header(SUBSCRIPTION_HEADER, self.key.expose_secret())
            .send()
            .map_err(classify_transport)?;
        let body = read_success_text(response)?;
        parse_read_operation(&body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadOperation {
    status: String,
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    read_results: Vec<ReadPage>,
}

#[derive(Debug, Deserialize)]
struct ReadPage {
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Debug, Deserialize)]
struct Line {
    text: String,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
struct Word {
    #[serde(default)]
    confidence: f32,
}

/// Maps a read operation onto its status. A succeeded read joins every
/// page's lines and averages word confidence; the service reports no
/// language.
pub fn parse_read_operation(body: &str) -> Result<PollStatus<RawRecognition>, RecognitionError> {
    let operation: ReadOperation = parse_json(body)?;
    match operation.status.as_str() {
        "notStarted" | "running" => return Ok(PollStatus::Pending),
        "succeeded" => {}
        "failed" => {
            return Err(RecognitionError::ServerRejected {
                message: "read operation failed".to_string(),
            })
        }
        other => {
            return Err(RecognitionError::MalformedResponse(format!(
                "unknown read status '{}'",
                other
            )))
        }
    }

    let result = operation.analyze_result.ok_or_else(|| {
        RecognitionError::MalformedResponse("succeeded read has no analyzeResult".to_string())
    })?;

    let lines: Vec<&Line> = result
        .read_results
        .iter()
        .flat_map(|page| page.lines.iter())
        .collect();
    let confidences: Vec<f32> = lines
        .iter()
        .flat_map(|l| l.words.iter().map(|w| w.confidence))
        .collect();

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    Ok(PollStatus::Ready(RawRecognition {
        text: lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        confidence,
        language: None,
    }))
}

pub fn backend_from_config(config: &RecognitionConfig) -> Result<PollingBackend, ConfigError> {
    let azure = config
        .azure_vision
        .as_ref()
        .ok_or_else(|| ConfigError::Missing("recognition.azure_vision".to_string()))?;
    let transport = AzureReadTransport::new(azure, config.request_timeout())?;
    Ok(PollingBackend::new(
        "azure_vision",
        Box::new(transport),
        RetryPolicy::recognition(&config.retry),
        PollPolicy::new(
            azure.max_polls,
            Duration::from_secs(azure.poll_interval_secs),
        ),
        RecognitionCriteria::from_config(config),
    ))
}
