//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod extract;
mod init;
mod process;
mod providers;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "ocrdesk")]
#[command(about = "Invoice and receipt OCR review service")]
#[command(version)]
pub struct Cli {
    /// Data directory holding the database and stored documents (overrides config file)
    #[arg(long, short = 't', global = true)]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "OCRDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Start the HTTP API server
    Serve {
        /// Address to bind to: PORT, HOST, or HOST:PORT (default from config, else 127.0.0.1:3030)
        bind: Option<String>,
    },

    /// Run OCR on a local file and print the extraction
    Extract {
        /// PDF or image file to process
        file: PathBuf,
        /// Provider to use (openai, mistral, azure, llamaparse)
        #[arg(short, long)]
        provider: Option<String>,
        /// Output format (json, markdown, csv)
        #[arg(short, long, default_value = "json")]
        format: String,
    },

    /// Process a stored document and wait for the result
    Process {
        /// Document id
        id: i64,
        /// Provider to use instead of the document's or the default
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Show which OCR providers are configured
    Providers,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        target: cli.target,
    };
    let (settings, _config) = load_settings_with_options(options).await?;

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind.clone());
            serve::cmd_serve(&settings, &bind).await
        }
        Commands::Extract {
            file,
            provider,
            format,
        } => extract::cmd_extract(&settings, &file, provider.as_deref(), &format).await,
        Commands::Process { id, provider } => {
            process::cmd_process(&settings, id, provider.as_deref()).await
        }
        Commands::Providers => providers::cmd_providers(&settings),
    }
}
