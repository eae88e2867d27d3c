//! Document processing pipeline.
//!
//! A run reads the stored file, sends it to one OCR provider, scores and
//! normalizes the result, then stores the extraction and final status.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::export;
use crate::models::{Document, DocumentStatus, Extraction, ProcessingMetadata, StatusTransitionError};
use crate::ocr::{confidence, DocumentInput, ExtractedInvoice, OcrError, OcrProviderKind, ProviderRegistry};
use crate::rate_limit::backoff_delay;
use crate::repository::{Repository, RepositoryError};
use crate::storage::FileStore;

const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// Attempts for the repository calls that move a document out of `processing`.
const FINAL_WRITE_ATTEMPTS: u32 = 3;
const FINAL_WRITE_BACKOFF_MS: u64 = 50;

/// Stored when a finished run could not save its result.
const UNSAVED_RESULT_MESSAGE: &str =
    "Processing finished but the result could not be saved. Please try again.";

/// Stored on documents whose run was cut off by a restart.
const INTERRUPTED_MESSAGE: &str = "Processing was interrupted. Please try again.";

/// Retry a repository call on storage errors. Missing rows are not retried.
async fn retry_write<T, F, Fut>(document_id: i64, mut op: F) -> Result<T, RepositoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e @ RepositoryError::DocumentNotFound(_))
            | Err(e @ RepositoryError::ExtractionNotFound(_)) => return Err(e),
            Err(e) if attempt + 1 >= FINAL_WRITE_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(
                    "Storing state of document {} failed (attempt {}): {}",
                    document_id,
                    attempt + 1,
                    e
                );
                tokio::time::sleep(backoff_delay(attempt, FINAL_WRITE_BACKOFF_MS)).await;
                attempt += 1;
            }
        }
    }
}

/// Errors from starting or running a processing job.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Document {0} not found")]
    DocumentNotFound(i64),

    #[error("Document {0} is already being processed")]
    AlreadyProcessing(i64),

    #[error(transparent)]
    Transition(#[from] StatusTransitionError),

    #[error(transparent)]
    Provider(#[from] OcrError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Failed to read stored file: {0}")]
    File(#[from] std::io::Error),

    #[error("Failed to render export: {0}")]
    Render(#[from] serde_json::Error),
}

/// Runs OCR jobs for stored documents.
#[derive(Clone)]
pub struct Processor {
    repo: Arc<dyn Repository>,
    files: FileStore,
    registry: ProviderRegistry,
    delay: Duration,
}

impl Processor {
    pub fn new(repo: Arc<dyn Repository>, files: FileStore, registry: ProviderRegistry) -> Self {
        Self {
            repo,
            files,
            registry,
            delay: Duration::ZERO,
        }
    }

    /// Wait this long before a spawned run calls the provider.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Mark a document `processing` and run it in the background.
    ///
    /// Returns the document as it was stored when the run was scheduled.
    pub async fn start(
        &self,
        document_id: i64,
        provider: Option<OcrProviderKind>,
    ) -> Result<Document, ProcessingError> {
        let (document, kind) = self.begin(document_id, provider).await?;

        let processor = self.clone();
        tokio::spawn(async move {
            if !processor.delay.is_zero() {
                tokio::time::sleep(processor.delay).await;
            }
            if let Err(e) = processor.execute(document_id, kind).await {
                warn!("Processing document {} could not finish: {}", document_id, e);
            }
        });

        Ok(document)
    }

    /// Process a document inline and return its final state.
    pub async fn run_now(
        &self,
        document_id: i64,
        provider: Option<OcrProviderKind>,
    ) -> Result<Document, ProcessingError> {
        let (_, kind) = self.begin(document_id, provider).await?;
        self.execute(document_id, kind).await
    }

    async fn begin(
        &self,
        document_id: i64,
        provider: Option<OcrProviderKind>,
    ) -> Result<(Document, OcrProviderKind), ProcessingError> {
        let mut document = self
            .repo
            .get_document(document_id)
            .await?
            .ok_or(ProcessingError::DocumentNotFound(document_id))?;

        if document.status == DocumentStatus::Processing {
            return Err(ProcessingError::AlreadyProcessing(document_id));
        }

        let kind = provider
            .or(document.ocr_provider)
            .unwrap_or_else(|| self.registry.default_kind());
        self.registry.resolve(Some(kind))?;

        document.transition_to(DocumentStatus::Processing)?;
        document.ocr_provider = Some(kind);
        self.repo.update_document(&document).await?;

        info!(
            "Processing document {} ({}) with {}",
            document.id, document.original_filename, kind
        );
        Ok((document, kind))
    }

    /// Mark documents left `processing` by an earlier process as failed.
    ///
    /// Runs before the server accepts requests, when no run can be in flight.
    pub async fn recover_interrupted(&self) -> Result<usize, ProcessingError> {
        let mut recovered = 0;
        for mut document in self.repo.list_documents().await? {
            if document.status != DocumentStatus::Processing {
                continue;
            }
            document.fail(INTERRUPTED_MESSAGE)?;
            self.repo.update_document(&document).await?;
            warn!("Document {} was left processing; marked as error", document.id);
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn execute(
        &self,
        document_id: i64,
        kind: OcrProviderKind,
    ) -> Result<Document, ProcessingError> {
        let outcome = self.run_pipeline(document_id, kind).await;

        let running = retry_write(document_id, || self.repo.get_document(document_id))
            .await?
            .ok_or(ProcessingError::DocumentNotFound(document_id))?;
        let mut document = running.clone();

        match outcome {
            Ok(metadata) => {
                info!(
                    "Document {} completed in {}ms",
                    document_id, metadata.processing_time_ms
                );
                document.transition_to(DocumentStatus::Completed)?;
                document.processing_metadata = Some(metadata);
            }
            Err(e) => {
                let raw = e.to_string();
                warn!("Document {} failed with {}: {}", document_id, kind, raw);
                document.fail(friendly_error(&raw))?;
            }
        }

        match retry_write(document_id, || self.repo.update_document(&document)).await {
            Ok(()) => Ok(document),
            Err(e) if document.status == DocumentStatus::Completed => {
                // Leave the document retryable rather than stuck in `processing`
                warn!("Could not store result for document {}: {}", document_id, e);
                let mut failed = running;
                failed.fail(UNSAVED_RESULT_MESSAGE)?;
                retry_write(document_id, || self.repo.update_document(&failed)).await?;
                Ok(failed)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_pipeline(
        &self,
        document_id: i64,
        kind: OcrProviderKind,
    ) -> Result<ProcessingMetadata, ProcessingError> {
        let started = Instant::now();
        let document = self
            .repo
            .get_document(document_id)
            .await?
            .ok_or(ProcessingError::DocumentNotFound(document_id))?;

        let bytes = self.files.read(&document.storage_path).await?;
        let provider = self.registry.resolve(Some(kind))?;
        let input = DocumentInput::new(
            document.original_filename.clone(),
            document.mime_type.clone(),
            bytes,
        );
        debug!(
            "Sending {} ({} bytes, {}) to {}",
            input.filename,
            input.bytes.len(),
            input.mime_type,
            kind
        );

        let outcome = provider.extract(&input).await?;

        let metadata = ProcessingMetadata {
            ocr_engine: kind.as_str().to_string(),
            model: outcome.model,
            processing_time_ms: started.elapsed().as_millis() as u64,
            processed_at: Utc::now(),
            document_classification: outcome.fields.document_type.clone(),
        };

        // The document may have been deleted while the provider was working.
        if self.repo.get_document(document_id).await?.is_none() {
            return Err(ProcessingError::DocumentNotFound(document_id));
        }

        let extraction = build_extraction(document_id, outcome.fields, metadata.clone());
        let mut saved = self.repo.save_extraction(extraction).await?;
        refresh_cached_exports(&mut saved)?;
        self.repo.update_extraction(&saved).await?;

        Ok(metadata)
    }
}

/// Turn normalized provider output into an extraction record.
///
/// Confidence is scored before required-field defaults are filled in, so
/// placeholder values do not count as extracted data.
pub fn build_extraction(
    document_id: i64,
    mut fields: ExtractedInvoice,
    metadata: ProcessingMetadata,
) -> Extraction {
    let confidence_scores = confidence::score(&fields);
    fields.apply_required_defaults();

    let mut extraction = Extraction::new(document_id);
    extraction.vendor_name = fields.vendor_name;
    extraction.vendor_address = fields.vendor_address;
    extraction.vendor_contact = fields.vendor_contact;
    extraction.customer_name = fields.customer_name;
    extraction.customer_address = fields.customer_address;
    extraction.invoice_number = fields.invoice_number;
    extraction.invoice_date = fields.invoice_date;
    extraction.due_date = fields.due_date;
    extraction.currency = fields.currency;
    extraction.subtotal = fields.subtotal;
    extraction.tax_amount = fields.tax_amount;
    extraction.discount = fields.discount;
    extraction.total_amount = fields.total_amount;
    extraction.line_items = fields.line_items;
    extraction.handwritten_notes = fields.handwritten_notes;
    extraction.layout_data = fields.layout;
    extraction.additional_info = fields.additional_info;
    extraction.confidence_scores = confidence_scores;
    extraction.processing_metadata = Some(metadata);
    extraction
}

/// Re-render the cached Markdown and JSON exports.
pub fn refresh_cached_exports(extraction: &mut Extraction) -> Result<(), serde_json::Error> {
    extraction.markdown_output = Some(export::to_markdown(extraction));
    extraction.json_output = Some(export::to_json(extraction)?);
    Ok(())
}

/// Rewrite a provider failure into a message suitable for end users.
pub fn friendly_error(raw: &str) -> String {
    let msg = raw.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    let friendly = if has(&["not configured", "not set"]) {
        "The selected OCR provider is not configured. Check its API key settings."
    } else if has(&["timed out", "timeout"]) {
        "The OCR service took too long to respond. Please try again."
    } else if has(&["rate limit", "429"]) {
        "The OCR service is rate limiting requests. Please wait a moment and try again."
    } else if has(&["401", "403", "unauthorized", "forbidden", "api key", "authentication"]) {
        "Authentication with the OCR service failed. Check the API key."
    } else if has(&["quota", "insufficient"]) {
        "The OCR service quota has been exceeded."
    } else if has(&["connect", "network", "dns"]) {
        "Could not reach the OCR service. Check the network connection."
    } else if has(&["unsupported"]) {
        "This file type is not supported by the selected OCR provider."
    } else if has(&["invalid response", "parse", "json"]) {
        "The OCR service returned a response that could not be read."
    } else {
        let detail: String = raw.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        return format!("Processing failed: {}", detail);
    };
    friendly.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItem;
    use crate::ocr::{OcrOutcome, OcrProvider};
    use crate::repository::{DieselError, MemoryRepository, RepoResult};
    use async_trait::async_trait;
    use diesel::result::DatabaseErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    struct FakeProvider {
        kind: OcrProviderKind,
        fail_with: Option<fn() -> OcrError>,
    }

    #[async_trait]
    impl OcrProvider for FakeProvider {
        fn kind(&self) -> OcrProviderKind {
            self.kind
        }

        fn is_available(&self) -> bool {
            true
        }

        fn availability_hint(&self) -> String {
            "fake provider".to_string()
        }

        async fn extract(&self, input: &DocumentInput) -> Result<OcrOutcome, OcrError> {
            if let Some(fail) = self.fail_with {
                return Err(fail());
            }
            assert!(!input.bytes.is_empty());
            Ok(OcrOutcome {
                fields: ExtractedInvoice {
                    vendor_name: Some("Acme".to_string()),
                    invoice_date: Some("2024-03-01".to_string()),
                    total_amount: Some(20.0),
                    line_items: vec![LineItem {
                        description: "Widget".to_string(),
                        quantity: Some(2.0),
                        unit_price: Some(10.0),
                        amount: Some(20.0),
                        product_code: None,
                    }],
                    document_type: Some("invoice".to_string()),
                    ..Default::default()
                },
                model: Some("fake-model".to_string()),
            })
        }
    }

    /// Memory repository whose writes of completed documents fail a set
    /// number of times.
    struct FailingRepository {
        inner: MemoryRepository,
        completed_write_failures: AtomicU32,
    }

    impl FailingRepository {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryRepository::new(),
                completed_write_failures: AtomicU32::new(failures),
            }
        }
    }

    fn locked() -> RepositoryError {
        RepositoryError::Database(DieselError::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("database is locked".to_string()),
        ))
    }

    #[async_trait]
    impl Repository for FailingRepository {
        async fn create_document(&self, document: Document) -> RepoResult<Document> {
            self.inner.create_document(document).await
        }
        async fn get_document(&self, id: i64) -> RepoResult<Option<Document>> {
            self.inner.get_document(id).await
        }
        async fn list_documents(&self) -> RepoResult<Vec<Document>> {
            self.inner.list_documents().await
        }
        async fn update_document(&self, document: &Document) -> RepoResult<()> {
            if document.status == DocumentStatus::Completed {
                let remaining = self.completed_write_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.completed_write_failures
                        .store(remaining - 1, Ordering::SeqCst);
                    return Err(locked());
                }
            }
            self.inner.update_document(document).await
        }
        async fn delete_document(&self, id: i64) -> RepoResult<Option<Document>> {
            self.inner.delete_document(id).await
        }
        async fn next_document_after(&self, id: i64) -> RepoResult<Option<Document>> {
            self.inner.next_document_after(id).await
        }
        async fn count_by_status(&self) -> RepoResult<Vec<(DocumentStatus, u64)>> {
            self.inner.count_by_status().await
        }
        async fn count_documents_with_storage_path(&self, path: &str) -> RepoResult<u64> {
            self.inner.count_documents_with_storage_path(path).await
        }
        async fn save_extraction(&self, extraction: Extraction) -> RepoResult<Extraction> {
            self.inner.save_extraction(extraction).await
        }
        async fn get_extraction(&self, id: i64) -> RepoResult<Option<Extraction>> {
            self.inner.get_extraction(id).await
        }
        async fn get_extraction_for_document(
            &self,
            document_id: i64,
        ) -> RepoResult<Option<Extraction>> {
            self.inner.get_extraction_for_document(document_id).await
        }
        async fn list_extractions(&self) -> RepoResult<Vec<Extraction>> {
            self.inner.list_extractions().await
        }
        async fn update_extraction(&self, extraction: &Extraction) -> RepoResult<()> {
            self.inner.update_extraction(extraction).await
        }
    }

    fn timeout_error() -> OcrError {
        OcrError::Timeout(OcrProviderKind::OpenAi)
    }

    async fn setup(
        fail_with: Option<fn() -> OcrError>,
    ) -> (Processor, Arc<dyn Repository>, Document, tempfile::TempDir) {
        setup_with_repo(fail_with, Arc::new(MemoryRepository::new())).await
    }

    async fn setup_with_repo(
        fail_with: Option<fn() -> OcrError>,
        repo: Arc<dyn Repository>,
    ) -> (Processor, Arc<dyn Repository>, Document, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let files = FileStore::new(dir.path());

        let stored = files
            .save("inv.pdf", "application/pdf", b"%PDF-1.7 test")
            .await
            .unwrap();
        let document = repo
            .create_document(Document::new(
                "inv.pdf".to_string(),
                13,
                "application/pdf".to_string(),
                stored.relative_path,
                stored.content_hash,
            ))
            .await
            .unwrap();

        let mut registry = ProviderRegistry::new(OcrProviderKind::OpenAi);
        registry.register(Arc::new(FakeProvider {
            kind: OcrProviderKind::OpenAi,
            fail_with,
        }));

        (
            Processor::new(repo.clone(), files, registry),
            repo,
            document,
            dir,
        )
    }

    #[tokio::test]
    async fn test_run_now_completes() {
        let (processor, repo, document, _dir) = setup(None).await;

        let done = processor.run_now(document.id, None).await.unwrap();
        assert_eq!(done.status, DocumentStatus::Completed);
        assert_eq!(done.ocr_provider, Some(OcrProviderKind::OpenAi));
        let meta = done.processing_metadata.unwrap();
        assert_eq!(meta.ocr_engine, "openai");
        assert_eq!(meta.document_classification.as_deref(), Some("invoice"));

        let extraction = repo
            .get_extraction_for_document(document.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(extraction.vendor_name.as_deref(), Some("Acme"));
        assert_eq!(extraction.invoice_number.as_deref(), Some("Unknown"));
        assert!(extraction.confidence_scores.overall > 0.0);
        assert!(extraction
            .markdown_output
            .as_deref()
            .unwrap()
            .contains("Widget"));
        let cached: serde_json::Value =
            serde_json::from_str(extraction.json_output.as_deref().unwrap()).unwrap();
        assert_eq!(cached["id"], extraction.id);
    }

    #[tokio::test]
    async fn test_reprocess_keeps_one_extraction() {
        let (processor, repo, document, _dir) = setup(None).await;
        processor.run_now(document.id, None).await.unwrap();
        processor.run_now(document.id, None).await.unwrap();
        assert_eq!(repo.list_extractions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_marks_error() {
        let (processor, _repo, document, _dir) =
            setup(Some(timeout_error)).await;

        let done = processor.run_now(document.id, None).await.unwrap();
        assert_eq!(done.status, DocumentStatus::Error);
        assert_eq!(
            done.error_message.as_deref(),
            Some("The OCR service took too long to respond. Please try again.")
        );

        // Retry is allowed from the error state
        let retried = processor.run_now(document.id, None).await.unwrap();
        assert_eq!(retried.status, DocumentStatus::Error);
    }

    #[tokio::test]
    async fn test_start_rejects_missing_and_busy() {
        let (processor, repo, document, _dir) = setup(None).await;

        assert!(matches!(
            processor.start(999, None).await,
            Err(ProcessingError::DocumentNotFound(999))
        ));

        let mut busy = document.clone();
        busy.transition_to(DocumentStatus::Processing).unwrap();
        repo.update_document(&busy).await.unwrap();
        assert!(matches!(
            processor.start(document.id, None).await,
            Err(ProcessingError::AlreadyProcessing(_))
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_unregistered_provider() {
        let (processor, repo, document, _dir) = setup(None).await;
        assert!(matches!(
            processor
                .start(document.id, Some(OcrProviderKind::Azure))
                .await,
            Err(ProcessingError::Provider(OcrError::NotConfigured(..)))
        ));
        let unchanged = repo.get_document(document.id).await.unwrap().unwrap();
        assert_eq!(unchanged.status, DocumentStatus::Uploaded);
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let (processor, repo, document, _dir) = setup(None).await;

        let scheduled = processor.start(document.id, None).await.unwrap();
        assert_eq!(scheduled.status, DocumentStatus::Processing);

        let mut status = scheduled.status;
        for _ in 0..100 {
            status = repo.get_document(document.id).await.unwrap().unwrap().status;
            if status != DocumentStatus::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retried() {
        let repo: Arc<dyn Repository> = Arc::new(FailingRepository::new(1));
        let (processor, repo, document, _dir) = setup_with_repo(None, repo).await;

        let done = processor.run_now(document.id, None).await.unwrap();
        assert_eq!(done.status, DocumentStatus::Completed);
        let stored = repo.get_document(document.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn test_unsaved_result_leaves_document_retryable() {
        let repo: Arc<dyn Repository> =
            Arc::new(FailingRepository::new(FINAL_WRITE_ATTEMPTS));
        let (processor, repo, document, _dir) = setup_with_repo(None, repo).await;

        let done = processor.run_now(document.id, None).await.unwrap();
        assert_eq!(done.status, DocumentStatus::Error);
        assert_eq!(done.error_message.as_deref(), Some(UNSAVED_RESULT_MESSAGE));

        let stored = repo.get_document(document.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Error);

        // The failures are used up, so a retry goes through
        let retried = processor.run_now(document.id, None).await.unwrap();
        assert_eq!(retried.status, DocumentStatus::Completed);
    }

    #[tokio::test]
    async fn test_recover_interrupted_marks_processing_as_error() {
        let (processor, repo, document, _dir) = setup(None).await;
        let other = repo
            .create_document(Document::new(
                "other.pdf".to_string(),
                1,
                "application/pdf".to_string(),
                document.storage_path.clone(),
                document.content_hash.clone(),
            ))
            .await
            .unwrap();

        let mut stuck = document.clone();
        stuck.transition_to(DocumentStatus::Processing).unwrap();
        repo.update_document(&stuck).await.unwrap();

        assert_eq!(processor.recover_interrupted().await.unwrap(), 1);

        let recovered = repo.get_document(document.id).await.unwrap().unwrap();
        assert_eq!(recovered.status, DocumentStatus::Error);
        assert_eq!(recovered.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        let untouched = repo.get_document(other.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, DocumentStatus::Uploaded);

        let done = processor.run_now(document.id, None).await.unwrap();
        assert_eq!(done.status, DocumentStatus::Completed);
    }

    #[test]
    fn test_friendly_error_mapping() {
        assert!(friendly_error("openai is not configured: OPENAI_API_KEY not set")
            .contains("not configured"));
        assert!(friendly_error("mistral request timed out").contains("too long"));
        assert!(friendly_error("Rate limited by azure, retry after None").contains("rate limiting"));
        assert!(friendly_error("request failed with HTTP 401: bad key").contains("Authentication"));
        assert!(friendly_error("You exceeded your current quota").contains("quota"));
        assert!(friendly_error("openai network error: connection refused").contains("reach"));
        assert!(friendly_error("Unsupported file type for mistral: tiff").contains("not supported"));
        assert!(friendly_error("azure returned an invalid response: eof").contains("could not be read"));
        assert_eq!(friendly_error("boom"), "Processing failed: boom");
        assert!(friendly_error(&"x".repeat(500)).len() < 250);
    }
}
