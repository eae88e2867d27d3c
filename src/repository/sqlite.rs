//! SQLite repository built on Diesel.
//!
//! Uses diesel-async's SyncConnectionWrapper to provide an async interface
//! while keeping Diesel's compile-time query checking.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl, SimpleAsyncConnection};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::diesel_models::{DocumentRecord, DocumentRow, ExtractionRecord, ExtractionRow};
use super::diesel_pool::{AsyncSqliteConnection, AsyncSqlitePool, DieselError};
use super::{RepoResult, Repository, RepositoryError};
use crate::models::{Document, DocumentStatus, Extraction};
use crate::schema::{documents, extractions};

/// Table definitions created on startup.
///
/// WAL mode is stored in the database file, so it only needs setting once.
pub const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    original_filename TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'uploaded',
    error_message TEXT,
    ocr_provider TEXT,
    processing_metadata TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

CREATE TABLE IF NOT EXISTS extractions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL UNIQUE REFERENCES documents(id) ON DELETE CASCADE,
    vendor_name TEXT,
    vendor_address TEXT,
    vendor_contact TEXT,
    customer_name TEXT,
    customer_address TEXT,
    invoice_number TEXT,
    invoice_date TEXT,
    due_date TEXT,
    currency TEXT,
    subtotal REAL,
    tax_amount REAL,
    discount REAL,
    total_amount REAL,
    line_items TEXT NOT NULL DEFAULT '[]',
    handwritten_notes TEXT NOT NULL DEFAULT '[]',
    confidence_scores TEXT NOT NULL DEFAULT '{}',
    layout_data TEXT NOT NULL DEFAULT '[]',
    additional_info TEXT NOT NULL DEFAULT '{}',
    processing_metadata TEXT,
    markdown_output TEXT,
    json_output TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

#[derive(diesel::QueryableByName)]
struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt, column_name = "last_insert_rowid()")]
    id: i64,
}

async fn last_insert_rowid(conn: &mut AsyncSqliteConnection) -> Result<i64, DieselError> {
    diesel::sql_query("SELECT last_insert_rowid()")
        .get_result::<LastInsertRowId>(conn)
        .await
        .map(|r| r.id)
}

/// Diesel-backed repository for SQLite.
///
/// Writes from this process are serialized through `write_lock`; SQLite
/// allows one writer at a time and a deferred transaction that reads before
/// it writes cannot wait for the lock.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: AsyncSqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Create tables if they do not exist yet.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        debug!("sqlite schema ready at {}", self.pool.database_url());
        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn create_document(&self, mut document: Document) -> RepoResult<Document> {
        let _writer = self.writer().await;
        let mut conn = self.pool.get().await?;
        let row = DocumentRow::from_document(&document)?;

        let id = conn
            .transaction::<i64, DieselError, _>(|conn| {
                Box::pin(async move {
                    diesel::insert_into(documents::table)
                        .values(&row)
                        .execute(conn)
                        .await?;
                    last_insert_rowid(conn).await
                })
            })
            .await?;

        document.id = id;
        Ok(document)
    }

    async fn get_document(&self, id: i64) -> RepoResult<Option<Document>> {
        let mut conn = self.pool.get().await?;

        Ok(documents::table
            .find(id)
            .select(DocumentRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(Document::from))
    }

    async fn list_documents(&self) -> RepoResult<Vec<Document>> {
        let mut conn = self.pool.get().await?;

        let records = documents::table
            .select(DocumentRecord::as_select())
            .order((documents::created_at.desc(), documents::id.desc()))
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(Document::from).collect())
    }

    async fn update_document(&self, document: &Document) -> RepoResult<()> {
        let _writer = self.writer().await;
        let mut conn = self.pool.get().await?;
        let row = DocumentRow::from_document(document)?;

        let rows = diesel::update(documents::table.find(document.id))
            .set(&row)
            .execute(&mut conn)
            .await?;
        if rows == 0 {
            return Err(RepositoryError::DocumentNotFound(document.id));
        }
        Ok(())
    }

    async fn delete_document(&self, id: i64) -> RepoResult<Option<Document>> {
        let _writer = self.writer().await;
        let mut conn = self.pool.get().await?;

        let existing = documents::table
            .find(id)
            .select(DocumentRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        let Some(record) = existing else {
            return Ok(None);
        };

        conn.transaction::<(), DieselError, _>(|conn| {
            Box::pin(async move {
                diesel::delete(extractions::table.filter(extractions::document_id.eq(id)))
                    .execute(conn)
                    .await?;
                diesel::delete(documents::table.find(id))
                    .execute(conn)
                    .await?;
                Ok(())
            })
        })
        .await?;

        Ok(Some(Document::from(record)))
    }

    async fn next_document_after(&self, id: i64) -> RepoResult<Option<Document>> {
        let mut conn = self.pool.get().await?;

        Ok(documents::table
            .filter(documents::id.gt(id))
            .order(documents::id.asc())
            .select(DocumentRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(Document::from))
    }

    async fn count_by_status(&self) -> RepoResult<Vec<(DocumentStatus, u64)>> {
        let mut conn = self.pool.get().await?;

        use diesel::dsl::count_star;
        let rows: Vec<(String, i64)> = documents::table
            .group_by(documents::status)
            .select((documents::status, count_star()))
            .load(&mut conn)
            .await?;

        Ok(DocumentStatus::ALL
            .iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(s, _)| s == status.as_str())
                    .map(|(_, c)| *c as u64)
                    .unwrap_or(0);
                (*status, count)
            })
            .collect())
    }

    async fn count_documents_with_storage_path(&self, storage_path: &str) -> RepoResult<u64> {
        let mut conn = self.pool.get().await?;

        let count: i64 = documents::table
            .filter(documents::storage_path.eq(storage_path))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count as u64)
    }

    async fn save_extraction(&self, mut extraction: Extraction) -> RepoResult<Extraction> {
        let _writer = self.writer().await;
        let mut conn = self.pool.get().await?;
        let document_id = extraction.document_id;
        extraction.updated_at = Utc::now();

        let saved = conn
            .transaction::<Option<Extraction>, DieselError, _>(|conn| {
                Box::pin(async move {
                    let document = documents::table
                        .find(document_id)
                        .select(documents::id)
                        .first::<i64>(conn)
                        .await
                        .optional()?;
                    if document.is_none() {
                        return Ok(None);
                    }

                    let existing = extractions::table
                        .filter(extractions::document_id.eq(document_id))
                        .select((extractions::id, extractions::created_at))
                        .first::<(i64, String)>(conn)
                        .await
                        .optional()?;

                    match existing {
                        Some((id, created_at)) => {
                            extraction.id = id;
                            extraction.created_at = super::parse_datetime(&created_at);
                            let row = ExtractionRow::from_extraction(&extraction)
                                .map_err(|e| DieselError::SerializationError(Box::new(e)))?;
                            diesel::update(extractions::table.find(id))
                                .set(&row)
                                .execute(conn)
                                .await?;
                        }
                        None => {
                            let row = ExtractionRow::from_extraction(&extraction)
                                .map_err(|e| DieselError::SerializationError(Box::new(e)))?;
                            diesel::insert_into(extractions::table)
                                .values(&row)
                                .execute(conn)
                                .await?;
                            extraction.id = last_insert_rowid(conn).await?;
                        }
                    }
                    Ok(Some(extraction))
                })
            })
            .await?;

        saved.ok_or(RepositoryError::DocumentNotFound(document_id))
    }

    async fn get_extraction(&self, id: i64) -> RepoResult<Option<Extraction>> {
        let mut conn = self.pool.get().await?;

        Ok(extractions::table
            .find(id)
            .select(ExtractionRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(Extraction::from))
    }

    async fn get_extraction_for_document(
        &self,
        document_id: i64,
    ) -> RepoResult<Option<Extraction>> {
        let mut conn = self.pool.get().await?;

        Ok(extractions::table
            .filter(extractions::document_id.eq(document_id))
            .select(ExtractionRecord::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .map(Extraction::from))
    }

    async fn list_extractions(&self) -> RepoResult<Vec<Extraction>> {
        let mut conn = self.pool.get().await?;

        let records = extractions::table
            .select(ExtractionRecord::as_select())
            .order((extractions::created_at.desc(), extractions::id.desc()))
            .load(&mut conn)
            .await?;
        Ok(records.into_iter().map(Extraction::from).collect())
    }

    async fn update_extraction(&self, extraction: &Extraction) -> RepoResult<()> {
        let _writer = self.writer().await;
        let mut conn = self.pool.get().await?;
        let row = ExtractionRow::from_extraction(extraction)?;

        let rows = diesel::update(extractions::table.find(extraction.id))
            .set(&row)
            .execute(&mut conn)
            .await?;
        if rows == 0 {
            return Err(RepositoryError::ExtractionNotFound(extraction.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineItem, ProcessingMetadata};
    use crate::ocr::OcrProviderKind;
    use tempfile::tempdir;

    async fn setup_test_db() -> (SqliteRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let repo = SqliteRepository::new(AsyncSqlitePool::new(&db_path.display().to_string()));
        repo.init_schema().await.unwrap();
        (repo, dir)
    }

    fn doc(name: &str) -> Document {
        Document::new(
            name.to_string(),
            42,
            "application/pdf".to_string(),
            format!("ab/{}", name),
            "abcdef0123456789".to_string(),
        )
    }

    #[tokio::test]
    async fn test_document_crud() {
        let (repo, _dir) = setup_test_db().await;

        let created = repo.create_document(doc("a.pdf")).await.unwrap();
        assert!(created.id > 0);

        let mut fetched = repo.get_document(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.original_filename, "a.pdf");
        assert_eq!(fetched.status, DocumentStatus::Uploaded);

        fetched.transition_to(DocumentStatus::Processing).unwrap();
        fetched.ocr_provider = Some(OcrProviderKind::Azure);
        repo.update_document(&fetched).await.unwrap();

        let fetched = repo.get_document(created.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, DocumentStatus::Processing);
        assert_eq!(fetched.ocr_provider, Some(OcrProviderKind::Azure));

        let removed = repo.delete_document(created.id).await.unwrap();
        assert!(removed.is_some());
        assert!(repo.get_document(created.id).await.unwrap().is_none());
        assert!(repo.delete_document(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let (repo, _dir) = setup_test_db().await;
        let mut missing = doc("x.pdf");
        missing.id = 99;
        assert!(matches!(
            repo.update_document(&missing).await,
            Err(RepositoryError::DocumentNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_next_document_and_counts() {
        let (repo, _dir) = setup_test_db().await;
        let a = repo.create_document(doc("a.pdf")).await.unwrap();
        let b = repo.create_document(doc("b.pdf")).await.unwrap();

        let next = repo.next_document_after(a.id).await.unwrap().unwrap();
        assert_eq!(next.id, b.id);
        assert!(repo.next_document_after(b.id).await.unwrap().is_none());

        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts[0], (DocumentStatus::Uploaded, 2));
        assert_eq!(counts[2], (DocumentStatus::Completed, 0));

        let listed = repo.list_documents().await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_save_extraction_upserts_by_document() {
        let (repo, _dir) = setup_test_db().await;
        let d = repo.create_document(doc("inv.pdf")).await.unwrap();

        let mut first = Extraction::new(d.id);
        first.vendor_name = Some("Acme".to_string());
        first.line_items.push(LineItem {
            description: "Widget".to_string(),
            quantity: Some(2.0),
            unit_price: Some(5.0),
            amount: Some(10.0),
            product_code: None,
        });
        let first = repo.save_extraction(first).await.unwrap();

        let mut second = Extraction::new(d.id);
        second.vendor_name = Some("Acme Corp".to_string());
        second.processing_metadata = Some(ProcessingMetadata {
            ocr_engine: "azure".to_string(),
            model: None,
            processing_time_ms: 12,
            processed_at: Utc::now(),
            document_classification: Some("invoice".to_string()),
        });
        let second = repo.save_extraction(second).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(repo.list_extractions().await.unwrap().len(), 1);

        let stored = repo
            .get_extraction_for_document(d.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.vendor_name.as_deref(), Some("Acme Corp"));
        assert!(stored.line_items.is_empty());
        assert_eq!(
            stored
                .processing_metadata
                .as_ref()
                .map(|m| m.ocr_engine.as_str()),
            Some("azure")
        );
    }

    #[tokio::test]
    async fn test_save_extraction_for_deleted_document() {
        let (repo, _dir) = setup_test_db().await;
        let d = repo.create_document(doc("gone.pdf")).await.unwrap();
        repo.delete_document(d.id).await.unwrap();

        assert!(matches!(
            repo.save_extraction(Extraction::new(d.id)).await,
            Err(RepositoryError::DocumentNotFound(id)) if id == d.id
        ));
        assert!(repo.list_extractions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced_on_every_connection() {
        let (repo, _dir) = setup_test_db().await;
        let mut conn = repo.pool.get().await.unwrap();

        let orphan = Extraction::new(404);
        let row = ExtractionRow::from_extraction(&orphan).unwrap();
        let result = diesel::insert_into(extractions::table)
            .values(&row)
            .execute(&mut conn)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_wait_for_lock() {
        let (repo, _dir) = setup_test_db().await;

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    let created = repo.create_document(doc(&format!("c{}.pdf", i))).await?;
                    let mut extraction = Extraction::new(created.id);
                    extraction.invoice_number = Some(format!("INV-{}", i));
                    repo.save_extraction(extraction).await?;
                    Ok::<i64, RepositoryError>(created.id)
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 64);
        assert_eq!(repo.list_documents().await.unwrap().len(), 64);
        assert_eq!(repo.list_extractions().await.unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_count_documents_with_storage_path() {
        let (repo, _dir) = setup_test_db().await;
        let a = repo.create_document(doc("a.pdf")).await.unwrap();
        let mut twin = doc("again.pdf");
        twin.storage_path = a.storage_path.clone();
        repo.create_document(twin).await.unwrap();

        assert_eq!(repo.count_documents_with_storage_path(&a.storage_path).await.unwrap(), 2);
        repo.delete_document(a.id).await.unwrap();
        assert_eq!(repo.count_documents_with_storage_path(&a.storage_path).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_extraction_and_cascade() {
        let (repo, _dir) = setup_test_db().await;
        let d = repo.create_document(doc("inv.pdf")).await.unwrap();
        let mut e = repo.save_extraction(Extraction::new(d.id)).await.unwrap();

        e.total_amount = Some(99.5);
        e.vendor_contact = None;
        repo.update_extraction(&e).await.unwrap();
        let fetched = repo.get_extraction(e.id).await.unwrap().unwrap();
        assert_eq!(fetched.total_amount, Some(99.5));

        repo.delete_document(d.id).await.unwrap();
        assert!(repo.get_extraction(e.id).await.unwrap().is_none());
    }
}
