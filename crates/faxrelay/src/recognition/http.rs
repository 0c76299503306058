//! Shared HTTP plumbing for the recognition transports.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;

use crate::error::ConfigError;
use crate::recognition::error::RecognitionError;
use crate::sanitize::truncate_body;

const MAX_ERROR_BODY_CHARS: usize = 512;

pub fn build_client(timeout: Duration) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("faxrelay/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ConfigError::Validation {
            message: format!("Failed to build HTTP client: {}", e),
        })
}

/// Maps a non-success status to an error: 429 and 5xx are transient,
/// 401/403 are credential problems, any other 4xx is a bad request.
pub fn classify_status(status: StatusCode, body: &str) -> RecognitionError {
    let message = truncate_body(body.trim(), MAX_ERROR_BODY_CHARS);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RecognitionError::transient(format!("HTTP {}: {}", status.as_u16(), message))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        RecognitionError::Authentication {
            status: status.as_u16(),
            message,
        }
    } else {
        RecognitionError::InvalidRequest {
            status: status.as_u16(),
            message,
        }
    }
}

/// Transport-level failures (connect, timeout, reset) are transient; a body
/// that cannot be decoded is malformed.
pub fn classify_transport(err: reqwest::Error) -> RecognitionError {
    if err.is_decode() {
        RecognitionError::MalformedResponse(err.to_string())
    } else if err.is_builder() {
        RecognitionError::InvalidRequest {
            status: 0,
            message: err.to_string(),
        }
    } else {
        RecognitionError::transient(err.to_string())
    }
}

/// Returns the body of a successful response, or the classified error.
pub fn read_success_text(response: Response) -> Result<String, RecognitionError> {
    let status = response.status();
    let body = response.text().map_err(classify_transport)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(classify_status(status, &body))
    }
}

/// Passes a successful response through so its headers can be read.
pub fn ensure_success(response: Response) -> Result<Response, RecognitionError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().map_err(classify_transport)?;
        Err(classify_status(status, &body))
    }
}

pub fn parse_json<T: serde::de::DeserializeOwned>(body: &str) -> Result<T, RecognitionError> {
    serde_json::from_str(body).map_err(|e| {
        RecognitionError::MalformedResponse(format!(
            "{} in {}",
            e,
            truncate_body(body, MAX_ERROR_BODY_CHARS)
        ))
    })
}
