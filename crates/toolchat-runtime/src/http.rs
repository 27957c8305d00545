//! HTTP helpers shared by the providers

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use toolchat_core::error::{ChatError, Result};

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ChatError::Config(format!("HTTP client: {e}")))
}

/// Map a failed request onto the error the session's retry policy expects.
pub(crate) fn request_error(e: &reqwest::Error) -> ChatError {
    if e.is_connect() || e.is_timeout() {
        ChatError::ProviderUnavailable(e.to_string())
    } else {
        ChatError::Transport(e.to_string())
    }
}

pub(crate) fn status_error(status: StatusCode, body: &str) -> ChatError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(detail),
        s if s.is_server_error() => ChatError::ProviderUnavailable(detail),
        _ => ChatError::Transport(detail),
    }
}

/// Check the status and decode the JSON body
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }

    let body = response.text().await.map_err(|e| request_error(&e))?;
    serde_json::from_str(&body)
        .map_err(|e| ChatError::Transport(format!("unexpected response body: {e}")))
}
