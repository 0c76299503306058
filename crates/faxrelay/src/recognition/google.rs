//! Google Cloud Vision `files:annotate` transport.

use base64::Engine;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::{GoogleVisionConfig, RecognitionConfig};
use crate::error::ConfigError;
use crate::recognition::criteria::RecognitionCriteria;
use crate::recognition::error::RecognitionError;
use crate::recognition::http::{build_client, classify_transport, parse_json, read_success_text};
use crate::recognition::sync::{SyncBackend, SyncTransport};
use crate::recognition::RawRecognition;
use crate::retry::RetryPolicy;

pub struct GoogleVisionTransport {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    language_hints: Vec<String>,
}

impl GoogleVisionTransport {
    pub fn new(
        config: &GoogleVisionConfig,
        timeout: std::time::Duration,
    ) -> Result<Self, ConfigError> {
        let api_key = config
            .api_key
            .resolve()
            .map_err(|source| ConfigError::Secret {
                field: "recognition.google_vision.api_key".to_string(),
                source,
            })?;
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: config.endpoint.clone(),
            api_key,
            language_hints: config.language_hints.clone(),
        })
    }

    fn request_body(&self, document: &[u8], pages: &[usize]) -> serde_json::Value {
        let content = base64::engine::general_purpose::STANDARD.encode(document);
        json!({
            "requests": [{
                "inputConfig": {
                    "content": content,
                    "mimeType": "application/pdf",
                },
                "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
                "imageContext": { "languageHints": self.language_hints },
                "pages": pages,
            }]
        })
    }
}

/// `files:annotate` reads at most this many pages per request.
pub const MAX_PAGES_PER_REQUEST: usize = 5;

/// 1-based page numbers grouped into request-sized batches.
pub fn page_batches(page_count: usize) -> Vec<Vec<usize>> {
    (1..=page_count.max(1))
        .collect::<Vec<_>>()
        .chunks(MAX_PAGES_PER_REQUEST)
        .map(<[usize]>::to_vec)
        .collect()
}

impl SyncTransport for GoogleVisionTransport {
    fn recognize(
        &self,
        document: &[u8],
        page_count: usize,
    ) -> Result<RawRecognition, RecognitionError> {
        let mut merged = Annotation::default();
        for pages in page_batches(page_count) {
            let response = self
                .client
                .post(&self.endpoint)
                .query(&[("key", self.api_key.expose_secret())])
                .json(&self.request_body(document, &pages))
                .send()
                .map_err(classify_transport)?;
            let body = read_success_text(response)?;
            merged.absorb(parse_batch(&body)?);
        }
        Ok(merged.into_raw())
    }
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    responses: Vec<FileResponse>,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    #[serde(default)]
    responses: Vec<PageResponse>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageResponse {
    full_text_annotation: Option<TextAnnotation>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    confidence: f32,
    property: Option<TextProperty>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextProperty {
    #[serde(default)]
    detected_languages: Vec<DetectedLanguage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectedLanguage {
    language_code: String,
    #[serde(default)]
    confidence: f32,
}

// google.rpc.Code values worth retrying: UNAVAILABLE, RESOURCE_EXHAUSTED,
// DEADLINE_EXCEEDED, INTERNAL
fn status_error(status: ApiStatus) -> RecognitionError {
    match status.code {
        4 | 8 | 13 | 14 => RecognitionError::transient(status.message),
        7 | 16 => RecognitionError::Authentication {
            status: status.code as u16,
            message: status.message,
        },
        _ => RecognitionError::ServerRejected {
            message: format!("code {}: {}", status.code, status.message),
        },
    }
}

/// Text, page confidences and the most confident language collected from
/// one or more annotate responses.
#[derive(Debug, Default)]
struct Annotation {
    texts: Vec<String>,
    confidences: Vec<f32>,
    language: Option<DetectedLanguage>,
}

impl Annotation {
    fn consider_language(&mut self, lang: DetectedLanguage) {
        if self
            .language
            .as_ref()
            .map_or(true, |best| lang.confidence > best.confidence)
        {
            self.language = Some(lang);
        }
    }

    fn absorb(&mut self, other: Annotation) {
        self.texts.extend(other.texts);
        self.confidences.extend(other.confidences);
        if let Some(lang) = other.language {
            self.consider_language(lang);
        }
    }

    fn into_raw(self) -> RawRecognition {
        let confidence = if self.confidences.is_empty() {
            0.0
        } else {
            self.confidences.iter().sum::<f32>() / self.confidences.len() as f32
        };
        RawRecognition {
            text: self.texts.join("\n"),
            confidence,
            language: self.language.map(|l| l.language_code),
        }
    }
}

fn parse_batch(body: &str) -> Result<Annotation, RecognitionError> {
    let batch: BatchResponse = parse_json(body)?;
    let file = batch
        .responses
        .into_iter()
        .next()
        .ok_or_else(|| RecognitionError::MalformedResponse("empty responses".to_string()))?;
    if let Some(status) = file.error {
        return Err(status_error(status));
    }

    let mut annotation = Annotation::default();
    for page in file.responses {
        if let Some(status) = page.error {
            return Err(status_error(status));
        }
        let Some(full_text) = page.full_text_annotation else {
            continue;
        };
        annotation.texts.push(full_text.text);
        for p in full_text.pages {
            annotation.confidences.push(p.confidence);
            for lang in p.property.map(|p| p.detected_languages).unwrap_or_default() {
                annotation.consider_language(lang);
            }
        }
    }
    Ok(annotation)
}

/// Maps an annotate response onto text, mean page confidence and the most
/// confident detected language.
pub fn parse_annotate_response(body: &str) -> Result<RawRecognition, RecognitionError> {
    parse_batch(body).map(Annotation::into_raw)
}

pub fn backend_from_config(config: &RecognitionConfig) -> Result<SyncBackend, ConfigError> {
    let google = config
        .google_vision
        .as_ref()
        .ok_or_else(|| ConfigError::Missing("recognition.google_vision".to_string()))?;
    let transport = GoogleVisionTransport::new(google, config.request_timeout())?;
    Ok(SyncBackend::new(
        "google_vision",
        Box::new(transport),
        RetryPolicy::recognition(&config.retry),
        RecognitionCriteria::from_config(config),
    ))
}
