//! HTTP request handlers for the web server.

mod documents;
mod export;
mod extractions;
mod health;
mod helpers;
mod ingestion;
mod providers;

// Re-export handlers for use by the router
pub use documents::{
    delete_document, document_file, get_document, list_documents, next_document,
    process_document, upload_documents,
};
pub use export::{export_csv, export_json, export_markdown};
pub use extractions::{extraction_for_document, get_extraction, list_extractions, update_extraction};
pub use health::health;
pub use ingestion::{ingest_document, ingestion_status, require_api_key};
pub use providers::list_providers;
