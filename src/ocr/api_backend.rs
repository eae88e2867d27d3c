//! Shared infrastructure for cloud OCR providers.
//!
//! Provides common helpers for payload encoding, rate limiting,
//! retry logic, and vendor error decoding.

use std::future::Future;
use std::time::Duration;

use base64::Engine;
use tracing::{debug, warn};

use super::backend::{OcrError, OcrProviderKind};
use crate::rate_limit::{backoff_delay, get_delay_from_env, parse_retry_after};

/// Maximum retry attempts on rate limit (429) errors.
const MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff when no Retry-After is sent.
const BACKOFF_BASE_MS: u64 = 1000;

/// Encode bytes as a `data:` URI.
pub fn encode_data_uri(mime_type: &str, bytes: &[u8]) -> String {
    let base64_data = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{}", mime_type, base64_data)
}

/// Build an HTTP client for a provider.
pub fn http_client(provider: OcrProviderKind, timeout: Duration) -> Result<reqwest::Client, OcrError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ocrdesk/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| OcrError::Network(provider, format!("failed to create HTTP client: {}", e)))
}

/// Map a transport error into an OCR error.
pub fn map_reqwest_error(provider: OcrProviderKind, err: reqwest::Error) -> OcrError {
    if err.is_timeout() {
        OcrError::Timeout(provider)
    } else if err.is_decode() {
        OcrError::InvalidResponse(provider, err.to_string())
    } else {
        OcrError::Network(provider, err.to_string())
    }
}

/// Apply a configurable rate-limiting delay before an API request.
pub async fn apply_rate_delay(env_var: &str, default_ms: u64, provider: OcrProviderKind) {
    let delay = get_delay_from_env(env_var, default_ms);
    if delay > Duration::ZERO {
        debug!("{}: waiting {:?} before request", provider, delay);
        tokio::time::sleep(delay).await;
    }
}

/// Retry an API request on 429 (rate limited) responses with exponential backoff.
///
/// Returns the first non-429 response. If all retries are exhausted,
/// returns `OcrError::RateLimited`.
pub async fn retry_on_rate_limit<F, Fut>(
    provider: OcrProviderKind,
    make_request: F,
) -> Result<reqwest::Response, OcrError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    loop {
        let response = make_request()
            .await
            .map_err(|e| map_reqwest_error(provider, e))?;

        if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after_secs = retry_after.as_deref().and_then(|s| s.trim().parse::<u64>().ok());

        if attempt >= MAX_RETRIES {
            return Err(OcrError::RateLimited {
                provider,
                retry_after_secs,
            });
        }

        let wait = parse_retry_after(retry_after.as_deref())
            .unwrap_or_else(|| backoff_delay(attempt, BACKOFF_BASE_MS));

        warn!(
            "{} rate limited (attempt {}), waiting {:?}",
            provider,
            attempt + 1,
            wait
        );
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}

/// Turn a non-success response into an `OcrError::Http` with the vendor's message.
pub async fn ensure_success(
    provider: OcrProviderKind,
    response: reqwest::Response,
) -> Result<reqwest::Response, OcrError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(OcrError::Http {
        provider,
        status: status.as_u16(),
        message: error_message_from_body(&body),
    })
}

/// Pull a readable message out of a vendor error body.
///
/// Vendors use `{"error": {"message": ..}}`, `{"error": ".."}`,
/// `{"message": ..}` or `{"detail": ..}`; anything else is returned trimmed.
pub fn error_message_from_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/error/message"),
            value.get("error"),
            value.get("message"),
            value.get("detail"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(s) = candidate.as_str() {
                return s.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.chars().take(500).collect()
    }
}
