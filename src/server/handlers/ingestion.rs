//! Machine ingestion API under `/api/v1`.

use axum::{
    extract::{Multipart, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::documents::{auto_process, read_upload_form, store_uploads};
use super::helpers::{api_error, repository_error};
use super::super::AppState;

const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests without the configured ingestion key.
pub async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = state.ingest_api_key.as_deref() {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if !provided.is_some_and(|key| keys_match(key, expected)) {
            warn!("Rejected ingestion request with missing or invalid API key");
            return api_error(StatusCode::UNAUTHORIZED, "Invalid or missing API key");
        }
    }
    next.run(request).await
}

/// Compare keys without short-circuiting on the first differing byte.
///
/// Both sides are hashed first so the comparison length never depends on
/// the secret.
fn keys_match(provided: &str, expected: &str) -> bool {
    let provided = Sha256::digest(provided.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    provided
        .iter()
        .zip(expected.iter())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

/// Document counts by status and the providers that can run.
pub async fn ingestion_status(State(state): State<AppState>) -> Response {
    let counts = match state.repo.count_by_status().await {
        Ok(counts) => counts,
        Err(e) => return repository_error(e),
    };
    let total: u64 = counts.iter().map(|(_, n)| n).sum();
    let by_status: serde_json::Map<String, serde_json::Value> = counts
        .iter()
        .map(|(status, n)| (status.as_str().to_string(), json!(n)))
        .collect();
    let registry = state.processor.registry();

    Json(json!({
        "status": "ok",
        "total": total,
        "documents": by_status,
        "defaultProvider": registry.default_kind(),
        "availableProviders": registry.available(),
    }))
    .into_response()
}

/// Upload a single file and start processing it right away.
pub async fn ingest_document(State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match read_upload_form(multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };
    if form.files.len() > 1 {
        return api_error(
            StatusCode::BAD_REQUEST,
            "The ingestion API accepts one file per request",
        );
    }

    let documents = match store_uploads(&state, &form).await {
        Ok(documents) => documents,
        Err(response) => return response,
    };

    match auto_process(&state, documents).await.into_iter().next() {
        Some(document) => (StatusCode::CREATED, Json(document)).into_response(),
        None => api_error(StatusCode::BAD_REQUEST, "No file was uploaded"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_match() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "secreT"));
        assert!(!keys_match("secret", "secret-longer"));
        assert!(!keys_match("", "secret"));
    }
}
