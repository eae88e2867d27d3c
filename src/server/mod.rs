//! HTTP API for uploading, processing and reviewing documents.
//!
//! Provides:
//! - Multipart upload with validation before anything is stored
//! - Processing triggers that run OCR in the background
//! - Extraction review, editing and export
//! - A key-protected ingestion API for machine clients

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::Settings;
use crate::ocr::{registry_from_settings, ProviderRegistry};
use crate::repository::{open_repository, Repository};
use crate::services::{Processor, UploadLimits};
use crate::storage::FileStore;

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    pub files: FileStore,
    pub processor: Processor,
    pub upload_limits: UploadLimits,
    /// Key required by ingestion uploads, when configured.
    pub ingest_api_key: Option<Arc<str>>,
    /// Held while stored files gain or lose a document reference.
    pub file_refs: Arc<Mutex<()>>,
}

impl AppState {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        settings.ensure_directories()?;
        let repo = open_repository(settings).await?;
        let registry = registry_from_settings(&settings.ocr);
        Ok(Self::from_parts(repo, registry, settings))
    }

    /// Assemble state from an already opened repository and provider set.
    pub fn from_parts(
        repo: Arc<dyn Repository>,
        registry: ProviderRegistry,
        settings: &Settings,
    ) -> Self {
        let files = FileStore::new(&settings.documents_dir);
        let processor = Processor::new(repo.clone(), files.clone(), registry)
            .with_delay(Duration::from_millis(settings.processing_delay_ms));

        Self {
            repo,
            files,
            processor,
            upload_limits: settings.upload_limits,
            ingest_api_key: settings
                .ingest_api_key
                .as_deref()
                .filter(|k| !k.is_empty())
                .map(Arc::from),
            file_refs: Arc::new(Mutex::new(())),
        }
    }
}

/// Start the web server.
pub async fn serve(settings: &Settings, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(settings).await?;
    let recovered = state.processor.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!("Marked {} interrupted documents as failed", recovered);
    }
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
