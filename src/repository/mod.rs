//! Repository layer for document and extraction persistence.
//!
//! One async trait with two backends: an in-memory map for tests and
//! ephemeral runs, and SQLite through Diesel.

mod diesel_models;
mod diesel_pool;
mod memory;
mod sqlite;
mod util;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use diesel_pool::{AsyncSqlitePool, DieselError};
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::config::{Settings, StorageBackendKind};
use crate::models::{Document, DocumentStatus, Extraction};

/// Errors raised by a repository backend.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] DieselError),

    #[error("failed to encode stored field: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("document {0} not found")]
    DocumentNotFound(i64),

    #[error("extraction {0} not found")]
    ExtractionNotFound(i64),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Storage for documents and their extractions.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Insert a document and return it with its assigned id.
    async fn create_document(&self, document: Document) -> RepoResult<Document>;

    async fn get_document(&self, id: i64) -> RepoResult<Option<Document>>;

    /// All documents, newest first.
    async fn list_documents(&self) -> RepoResult<Vec<Document>>;

    async fn update_document(&self, document: &Document) -> RepoResult<()>;

    /// Delete a document and its extraction. Returns the removed document.
    async fn delete_document(&self, id: i64) -> RepoResult<Option<Document>>;

    /// The document with the smallest id greater than `id`.
    async fn next_document_after(&self, id: i64) -> RepoResult<Option<Document>>;

    /// Document count per status, in lifecycle order, zeros included.
    async fn count_by_status(&self) -> RepoResult<Vec<(DocumentStatus, u64)>>;

    /// Number of documents whose file is stored at `storage_path`.
    async fn count_documents_with_storage_path(&self, storage_path: &str) -> RepoResult<u64>;

    /// Store an extraction, replacing any existing one for the same document.
    ///
    /// A replacement keeps the existing extraction id and creation time.
    /// Fails with `DocumentNotFound` when the document no longer exists.
    async fn save_extraction(&self, extraction: Extraction) -> RepoResult<Extraction>;

    async fn get_extraction(&self, id: i64) -> RepoResult<Option<Extraction>>;

    async fn get_extraction_for_document(&self, document_id: i64)
        -> RepoResult<Option<Extraction>>;

    /// All extractions, newest first.
    async fn list_extractions(&self) -> RepoResult<Vec<Extraction>>;

    async fn update_extraction(&self, extraction: &Extraction) -> RepoResult<()>;
}

/// Open the repository backend selected in settings.
pub async fn open_repository(settings: &Settings) -> RepoResult<Arc<dyn Repository>> {
    match settings.storage_backend {
        StorageBackendKind::Memory => Ok(Arc::new(MemoryRepository::new())),
        StorageBackendKind::Sqlite => {
            let repo = SqliteRepository::new(AsyncSqlitePool::new(&settings.database_url()));
            repo.init_schema().await?;
            Ok(Arc::new(repo))
        }
    }
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}
