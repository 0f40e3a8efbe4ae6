//! HTTP helpers shared by the Google API adapters

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

use crate::connection::protocol::ErrorEnvelope;
use crate::error::PlatformError;
use crate::runtime::adapter::PlatformResult;

/// Build a JSON client with a per-request timeout
pub fn build_client(timeout: Duration) -> PlatformResult<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .user_agent(concat!("maplink/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PlatformError::Transport(e.to_string()))
}

/// Classify a reqwest failure
pub fn transport_error(error: reqwest::Error) -> PlatformError {
    if let Some(status) = error.status() {
        return PlatformError::Status {
            status: status.as_u16(),
            message: error.to_string(),
        };
    }
    if error.is_decode() {
        return PlatformError::Decode(error.to_string());
    }
    PlatformError::Transport(error.to_string())
}

/// Pass successful responses through; turn everything else into a
/// [`PlatformError`] carrying the API's own message
pub async fn check_status(response: Response) -> PlatformResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Error for a non-success status and its body
pub fn status_error(status: StatusCode, body: &str) -> PlatformError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .ok()
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                status.canonical_reason().unwrap_or("no details").to_string()
            } else {
                body.chars().take(512).collect()
            }
        });

    if status == StatusCode::UNAUTHORIZED {
        return PlatformError::Auth(message);
    }
    PlatformError::Status {
        status: status.as_u16(),
        message,
    }
}
