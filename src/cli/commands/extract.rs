//! One-off extraction command.

use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use console::style;

use crate::config::Settings;
use crate::export::{render, ExportFormat};
use crate::models::ProcessingMetadata;
use crate::ocr::{registry_from_settings, DocumentInput, OcrProviderKind};
use crate::services::processing::build_extraction;
use crate::services::validate_upload;

/// Run OCR on a local file and print the result without storing it.
pub async fn cmd_extract(
    settings: &Settings,
    file: &Path,
    provider: Option<&str>,
    format: &str,
) -> anyhow::Result<()> {
    let format = ExportFormat::from_str(format)
        .ok_or_else(|| anyhow::anyhow!("Unknown format '{}': use json, markdown or csv", format))?;
    let kind = match provider {
        Some(name) => Some(
            OcrProviderKind::from_str(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown provider '{}'", name))?,
        ),
        None => None,
    };

    let mut input = DocumentInput::from_path(file).await?;
    input.mime_type = validate_upload(
        &input.filename,
        Some(&input.mime_type),
        &input.bytes,
        &settings.upload_limits,
    )?;

    let registry = registry_from_settings(&settings.ocr);
    let provider = registry.resolve(kind)?;
    eprintln!(
        "{} Extracting {} with {}",
        style("→").cyan(),
        input.filename,
        provider.kind().display_name()
    );

    let started = Instant::now();
    let outcome = provider.extract(&input).await?;
    let metadata = ProcessingMetadata {
        ocr_engine: provider.kind().as_str().to_string(),
        model: outcome.model,
        processing_time_ms: started.elapsed().as_millis() as u64,
        processed_at: Utc::now(),
        document_classification: outcome.fields.document_type.clone(),
    };

    let extraction = build_extraction(0, outcome.fields, metadata);
    eprintln!(
        "  {} Overall confidence {:.0}%",
        style("✓").green(),
        extraction.confidence_scores.overall
    );
    println!("{}", render(&extraction, format)?);

    Ok(())
}
