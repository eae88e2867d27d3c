//! Initialize command.

use console::style;

use crate::config::{Settings, StorageBackendKind};
use crate::repository::open_repository;

/// Initialize the data directory and database.
pub async fn cmd_init(settings: &Settings) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    open_repository(settings).await?;

    match settings.storage_backend {
        StorageBackendKind::Sqlite => println!(
            "  {} Database ready at {}",
            style("✓").green(),
            settings.database_url()
        ),
        StorageBackendKind::Memory => println!(
            "{} Storage backend is in-memory; nothing will be persisted",
            style("!").yellow()
        ),
    }

    println!(
        "{} Initialized ocrdesk in {}",
        style("✓").green(),
        settings.data_dir.display()
    );
    println!("  Stored documents go to {}", settings.documents_dir.display());

    Ok(())
}
