//! Extraction review endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use tracing::{error, info};

use super::helpers::{api_error, not_found, repository_error};
use super::super::AppState;
use crate::models::{Document, Extraction, ExtractionPatch};
use crate::services::processing::refresh_cached_exports;

/// Load an extraction and its document, requiring the document to be
/// `completed` before the extraction can be reviewed.
pub async fn reviewable_extraction(
    state: &AppState,
    id: i64,
) -> Result<(Extraction, Document), Response> {
    let extraction = match state.repo.get_extraction(id).await {
        Ok(Some(extraction)) => extraction,
        Ok(None) => return Err(not_found("Extraction", id)),
        Err(e) => return Err(repository_error(e)),
    };
    let document = match state.repo.get_document(extraction.document_id).await {
        Ok(Some(document)) => document,
        Ok(None) => return Err(not_found("Document", extraction.document_id)),
        Err(e) => return Err(repository_error(e)),
    };

    if !document.status.allows_review() {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!(
                "Document {} is {}; extractions can only be reviewed once processing has completed",
                document.id, document.status
            ),
        ));
    }
    Ok((extraction, document))
}

pub async fn list_extractions(State(state): State<AppState>) -> impl IntoResponse {
    match state.repo.list_extractions().await {
        Ok(extractions) => Json(extractions).into_response(),
        Err(e) => repository_error(e),
    }
}

pub async fn get_extraction(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.repo.get_extraction(id).await {
        Ok(Some(extraction)) => Json(extraction).into_response(),
        Ok(None) => not_found("Extraction", id),
        Err(e) => repository_error(e),
    }
}

pub async fn extraction_for_document(
    State(state): State<AppState>,
    Path(document_id): Path<i64>,
) -> Response {
    match state.repo.get_extraction_for_document(document_id).await {
        Ok(Some(extraction)) => Json(extraction).into_response(),
        Ok(None) => api_error(
            StatusCode::NOT_FOUND,
            format!("No extraction for document {}", document_id),
        ),
        Err(e) => repository_error(e),
    }
}

/// Apply a partial edit and re-render the cached exports.
pub async fn update_extraction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<ExtractionPatch>,
) -> Response {
    let (mut extraction, _) = match reviewable_extraction(&state, id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    if extraction.apply_patch(patch) {
        extraction.updated_at = Utc::now();
        if let Err(e) = refresh_cached_exports(&mut extraction) {
            error!("Failed to render exports for extraction {}: {}", id, e);
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
        if let Err(e) = state.repo.update_extraction(&extraction).await {
            return repository_error(e);
        }
        info!("Updated extraction {}", id);
    }

    Json(extraction).into_response()
}
