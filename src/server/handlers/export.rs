//! Extraction export downloads.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use super::extractions::reviewable_extraction;
use super::helpers::api_error;
use super::super::AppState;
use crate::export::{render, ExportFormat};

async fn export_as(state: &AppState, id: i64, format: ExportFormat) -> Response {
    let (extraction, _) = match reviewable_extraction(state, id).await {
        Ok(found) => found,
        Err(response) => return response,
    };

    let body = match render(&extraction, format) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to export extraction {}: {}", id, e);
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", format.filename(id)),
            ),
        ],
        body,
    )
        .into_response()
}

pub async fn export_json(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    export_as(&state, id, ExportFormat::Json).await
}

pub async fn export_markdown(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    export_as(&state, id, ExportFormat::Markdown).await
}

pub async fn export_csv(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    export_as(&state, id, ExportFormat::Csv).await
}
