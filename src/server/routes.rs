//! Router configuration for the web server.

use axum::{
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Multipart framing allowance on top of the raw file bytes.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state
        .upload_limits
        .max_file_bytes
        .saturating_mul(state.upload_limits.max_files)
        .saturating_add(MULTIPART_OVERHEAD);

    // Ingestion uploads are key-protected; status stays public
    let ingestion = Router::new()
        .route("/api/v1/documents", post(handlers::ingest_document))
        .route_layer(from_fn_with_state(state.clone(), handlers::require_api_key))
        .route("/api/v1/status", get(handlers::ingestion_status));

    Router::new()
        .route("/health", get(handlers::health))
        // Documents
        .route(
            "/api/documents",
            get(handlers::list_documents).post(handlers::upload_documents),
        )
        .route(
            "/api/documents/:id",
            get(handlers::get_document).delete(handlers::delete_document),
        )
        .route("/api/documents/next/:id", get(handlers::next_document))
        .route(
            "/api/documents/:id/process",
            post(handlers::process_document),
        )
        .route("/api/documents/:id/file", get(handlers::document_file))
        // Extractions
        .route("/api/extractions", get(handlers::list_extractions))
        .route(
            "/api/extractions/:id",
            get(handlers::get_extraction).patch(handlers::update_extraction),
        )
        .route(
            "/api/extractions/document/:document_id",
            get(handlers::extraction_for_document),
        )
        // Exports, with short aliases used by older clients
        .route("/api/extractions/:id/export/json", get(handlers::export_json))
        .route(
            "/api/extractions/:id/export/markdown",
            get(handlers::export_markdown),
        )
        .route("/api/extractions/:id/export/csv", get(handlers::export_csv))
        .route("/api/extractions/:id/json", get(handlers::export_json))
        .route("/api/extractions/:id/markdown", get(handlers::export_markdown))
        .route("/api/extractions/:id/csv", get(handlers::export_csv))
        // Providers
        .route("/api/providers", get(handlers::list_providers))
        .merge(ingestion)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
