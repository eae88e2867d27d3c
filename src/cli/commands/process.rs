//! Process a stored document from the command line.

use std::sync::Arc;

use console::style;

use crate::config::{Settings, StorageBackendKind};
use crate::models::DocumentStatus;
use crate::ocr::{registry_from_settings, OcrProviderKind};
use crate::repository::open_repository;
use crate::services::Processor;
use crate::storage::FileStore;

/// Run OCR for a stored document and wait for the result.
pub async fn cmd_process(
    settings: &Settings,
    document_id: i64,
    provider: Option<&str>,
) -> anyhow::Result<()> {
    if settings.storage_backend == StorageBackendKind::Memory {
        anyhow::bail!("The in-memory backend has no stored documents to process");
    }
    let kind = match provider {
        Some(name) => Some(
            OcrProviderKind::from_str(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown provider '{}'", name))?,
        ),
        None => None,
    };

    let repo = open_repository(settings).await?;
    let processor = Processor::new(
        Arc::clone(&repo),
        FileStore::new(&settings.documents_dir),
        registry_from_settings(&settings.ocr),
    );

    println!(
        "{} Processing document {}...",
        style("→").cyan(),
        document_id
    );
    let document = processor.run_now(document_id, kind).await?;

    match document.status {
        DocumentStatus::Completed => {
            let extraction = repo.get_extraction_for_document(document_id).await?;
            let confidence = extraction
                .map(|e| e.confidence_scores.overall)
                .unwrap_or_default();
            println!(
                "  {} {} completed (confidence {:.0}%)",
                style("✓").green(),
                document.original_filename,
                confidence
            );
        }
        _ => println!(
            "  {} {} failed: {}",
            style("✗").red(),
            document.original_filename,
            document.error_message.as_deref().unwrap_or("unknown error")
        ),
    }

    Ok(())
}
