//! Shared response helpers for handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use crate::ocr::{OcrError, OcrProviderKind};
use crate::repository::RepositoryError;
use crate::services::{ProcessingError, UploadError};

/// JSON error body with the given status.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub fn not_found(what: &str, id: i64) -> Response {
    api_error(StatusCode::NOT_FOUND, format!("{} {} not found", what, id))
}

pub fn repository_error(e: RepositoryError) -> Response {
    error!("Repository error: {}", e);
    match e {
        RepositoryError::DocumentNotFound(id) => not_found("Document", id),
        RepositoryError::ExtractionNotFound(id) => not_found("Extraction", id),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

pub fn upload_error(e: UploadError) -> Response {
    let status = match e {
        UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        UploadError::UnsupportedType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::BAD_REQUEST,
    };
    api_error(status, e.to_string())
}

pub fn processing_error(e: ProcessingError) -> Response {
    match e {
        ProcessingError::DocumentNotFound(id) => not_found("Document", id),
        ProcessingError::AlreadyProcessing(_) | ProcessingError::Transition(_) => {
            api_error(StatusCode::CONFLICT, e.to_string())
        }
        ProcessingError::Provider(OcrError::NotConfigured(kind, hint)) => api_error(
            StatusCode::BAD_REQUEST,
            format!("{} is not available: {}", kind.display_name(), hint),
        ),
        ProcessingError::Repository(e) => repository_error(e),
        other => {
            error!("Processing error: {}", other);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}

/// Parse an optional provider selector. Blank means "use the default".
pub fn parse_provider(value: Option<&str>) -> Result<Option<OcrProviderKind>, Response> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => OcrProviderKind::from_str(v).map(Some).ok_or_else(|| {
            let known: Vec<&str> = OcrProviderKind::ALL.iter().map(|k| k.as_str()).collect();
            api_error(
                StatusCode::BAD_REQUEST,
                format!(
                    "Unknown OCR provider: {}. Expected one of: {}",
                    v,
                    known.join(", ")
                ),
            )
        }),
    }
}
