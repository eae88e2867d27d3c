//! Document upload, listing, deletion and processing endpoints.

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{info, warn};

use super::helpers::{
    api_error, not_found, parse_provider, processing_error, repository_error, upload_error,
};
use super::super::AppState;
use crate::models::Document;
use crate::ocr::OcrProviderKind;
use crate::services::{check_batch_size, validate_upload};

/// One file part from a multipart upload.
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Parsed multipart upload form.
#[derive(Default)]
pub struct UploadForm {
    pub files: Vec<UploadedFile>,
    pub ocr_provider: Option<OcrProviderKind>,
    pub auto_process: bool,
}

/// Read `files`/`file` parts plus the optional `ocrProvider` and
/// `autoProcess` text fields.
pub async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, Response> {
    let mut form = UploadForm::default();
    let mut provider_field = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return Err(api_error(
                    e.status(),
                    format!("Invalid multipart body: {}", e.body_text()),
                ))
            }
        };
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "files" | "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "upload".to_string());
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| {
                    api_error(
                        e.status(),
                        format!("Failed to read {}: {}", filename, e.body_text()),
                    )
                })?;
                form.files.push(UploadedFile {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            "ocrProvider" | "ocr_provider" => {
                provider_field = field.text().await.ok();
            }
            "autoProcess" | "auto_process" => {
                let value = field.text().await.unwrap_or_default();
                form.auto_process = matches!(value.trim(), "true" | "1" | "yes");
            }
            _ => {}
        }
    }

    form.ocr_provider = parse_provider(provider_field.as_deref())?;
    Ok(form)
}

/// Validate every file, then store each one and create its document.
///
/// Nothing is written unless the whole batch passes validation.
pub async fn store_uploads(state: &AppState, form: &UploadForm) -> Result<Vec<Document>, Response> {
    check_batch_size(form.files.len(), &state.upload_limits).map_err(upload_error)?;

    let mut mime_types = Vec::with_capacity(form.files.len());
    for file in &form.files {
        let mime = validate_upload(
            &file.filename,
            file.content_type.as_deref(),
            &file.bytes,
            &state.upload_limits,
        )
        .map_err(upload_error)?;
        mime_types.push(mime);
    }

    let _file_refs = state.file_refs.lock().await;
    let mut created = Vec::with_capacity(form.files.len());
    for (file, mime) in form.files.iter().zip(mime_types) {
        let stored = state
            .files
            .save(&file.filename, &mime, &file.bytes)
            .await
            .map_err(|e| {
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to store {}: {}", file.filename, e),
                )
            })?;

        let mut document = Document::new(
            file.filename.clone(),
            file.bytes.len() as u64,
            mime,
            stored.relative_path,
            stored.content_hash,
        );
        document.ocr_provider = form.ocr_provider;

        let document = state
            .repo
            .create_document(document)
            .await
            .map_err(repository_error)?;
        info!(
            "Uploaded document {} ({}, {} bytes)",
            document.id, document.original_filename, document.file_size
        );
        created.push(document);
    }

    Ok(created)
}

/// Start processing for freshly uploaded documents.
///
/// A document that cannot be started stays `uploaded`.
pub async fn auto_process(state: &AppState, documents: Vec<Document>) -> Vec<Document> {
    let mut out = Vec::with_capacity(documents.len());
    for document in documents {
        match state
            .processor
            .start(document.id, document.ocr_provider)
            .await
        {
            Ok(started) => out.push(started),
            Err(e) => {
                warn!("Could not start processing document {}: {}", document.id, e);
                out.push(document);
            }
        }
    }
    out
}

/// List all documents, newest first.
pub async fn list_documents(State(state): State<AppState>) -> impl IntoResponse {
    match state.repo.list_documents().await {
        Ok(documents) => Json(documents).into_response(),
        Err(e) => repository_error(e),
    }
}

/// Upload one or more documents.
pub async fn upload_documents(State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match read_upload_form(multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    let mut documents = match store_uploads(&state, &form).await {
        Ok(docs) => docs,
        Err(response) => return response,
    };
    if form.auto_process {
        documents = auto_process(&state, documents).await;
    }

    (StatusCode::CREATED, Json(documents)).into_response()
}

pub async fn get_document(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.repo.get_document(id).await {
        Ok(Some(document)) => Json(document).into_response(),
        Ok(None) => not_found("Document", id),
        Err(e) => repository_error(e),
    }
}

/// Delete a document, its extraction and its stored file.
pub async fn delete_document(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let _file_refs = state.file_refs.lock().await;
    let document = match state.repo.delete_document(id).await {
        Ok(Some(document)) => document,
        Ok(None) => return not_found("Document", id),
        Err(e) => return repository_error(e),
    };

    // Identical uploads share one stored file
    let shared = match state
        .repo
        .count_documents_with_storage_path(&document.storage_path)
        .await
    {
        Ok(count) => count > 0,
        Err(e) => return repository_error(e),
    };
    if shared {
        info!("Keeping {} for other documents", document.storage_path);
    } else if let Err(e) = state.files.delete(&document.storage_path).await {
        warn!(
            "Deleted document {} but could not remove {}: {}",
            id, document.storage_path, e
        );
    }
    info!("Deleted document {} ({})", id, document.original_filename);

    StatusCode::NO_CONTENT.into_response()
}

/// The next document after `id`, for review navigation.
pub async fn next_document(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.repo.next_document_after(id).await {
        Ok(Some(document)) => Json(document).into_response(),
        Ok(None) => api_error(
            StatusCode::NOT_FOUND,
            format!("No document after {}", id),
        ),
        Err(e) => repository_error(e),
    }
}

/// Optional body for a process request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub ocr_provider: Option<String>,
}

/// Start (or restart) OCR processing for a document.
pub async fn process_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ProcessRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let provider = match parse_provider(request.ocr_provider.as_deref()) {
        Ok(provider) => provider,
        Err(response) => return response,
    };

    match state.processor.start(id, provider).await {
        Ok(document) => (StatusCode::ACCEPTED, Json(document)).into_response(),
        Err(e) => processing_error(e),
    }
}

/// Serve the stored file with its MIME type.
pub async fn document_file(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let document = match state.repo.get_document(id).await {
        Ok(Some(document)) => document,
        Ok(None) => return not_found("Document", id),
        Err(e) => return repository_error(e),
    };

    let content = match state.files.read(&document.storage_path).await {
        Ok(content) => content,
        Err(e) => {
            warn!("Stored file for document {} unreadable: {}", id, e);
            return api_error(StatusCode::NOT_FOUND, "Stored file not found");
        }
    };

    let ascii_name: String = document
        .original_filename
        .chars()
        .filter(|c| (c.is_ascii_graphic() && *c != '"') || *c == ' ')
        .collect();
    let disposition = format!("inline; filename=\"{}\"", ascii_name);
    (
        [
            (header::CONTENT_TYPE, document.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        content,
    )
        .into_response()
}
