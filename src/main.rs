//! ocrdesk - invoice and receipt OCR review service.
//!
//! Accepts uploaded invoices and receipts, sends them to a third-party OCR
//! provider, and stores the normalized extraction for review and export.

mod cli;
mod config;
mod export;
mod models;
mod ocr;
mod rate_limit;
mod repository;
mod schema;
mod server;
mod services;
mod storage;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "ocrdesk=info"
    } else {
        "ocrdesk=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run().await
}
