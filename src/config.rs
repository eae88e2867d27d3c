//! Configuration management for ocrdesk.
//!
//! Settings are resolved in layers: built-in defaults, an optional config file
//! (TOML, YAML or JSON by extension), environment variables, then CLI flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ocr::OcrProviderKind;
use crate::services::upload::UploadLimits;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "ocrdesk.db";

/// Default documents subdirectory name.
const DOCUMENTS_SUBDIR: &str = "documents";

/// Config file stem searched for during discovery.
const CONFIG_STEM: &str = "ocrdesk";

/// Extensions tried during discovery, in order.
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Where documents and extractions are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// SQLite database file (persisted).
    #[default]
    Sqlite,
    /// In-process map (lost on restart).
    Memory,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// OCR provider credentials and tuning.
///
/// Missing fields take their values from the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Provider used when a request does not name one.
    pub default_provider: OcrProviderKind,
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    /// OpenAI-compatible chat completions URL.
    pub openai_base_url: Option<String>,
    #[serde(skip_serializing)]
    pub mistral_api_key: Option<String>,
    pub mistral_model: String,
    pub azure_endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub azure_api_key: Option<String>,
    pub azure_model: String,
    #[serde(skip_serializing)]
    pub llama_cloud_api_key: Option<String>,
    /// Model for the LlamaParse structuring pass.
    pub structuring_model: String,
    pub request_timeout_secs: u64,
    /// Delay between status polls for asynchronous vendors.
    pub poll_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for OcrSettings {
    fn default() -> Self {
        let mut settings = Self {
            default_provider: OcrProviderKind::OpenAi,
            openai_api_key: None,
            openai_model: "gpt-4o".to_string(),
            openai_base_url: None,
            mistral_api_key: None,
            mistral_model: "mistral-small-latest".to_string(),
            azure_endpoint: None,
            azure_api_key: None,
            azure_model: "prebuilt-invoice".to_string(),
            llama_cloud_api_key: None,
            structuring_model: "gpt-4o-mini".to_string(),
            request_timeout_secs: 120,
            poll_interval_ms: 1000,
            max_polls: 60,
        };
        settings.apply_env_from(env_opt);
        settings
    }
}

impl OcrSettings {
    /// Overwrite fields whose environment variable is set.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(kind) = lookup("OCR_PROVIDER") {
            match OcrProviderKind::from_str(&kind) {
                Some(kind) => self.default_provider = kind,
                None => tracing::warn!("Ignoring unknown OCR_PROVIDER value: {}", kind),
            }
        }

        let strings: [(&str, &mut Option<String>); 6] = [
            ("OPENAI_API_KEY", &mut self.openai_api_key),
            ("OPENAI_BASE_URL", &mut self.openai_base_url),
            ("MISTRAL_API_KEY", &mut self.mistral_api_key),
            ("AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT", &mut self.azure_endpoint),
            ("AZURE_DOCUMENT_INTELLIGENCE_KEY", &mut self.azure_api_key),
            ("LLAMA_CLOUD_API_KEY", &mut self.llama_cloud_api_key),
        ];
        for (name, field) in strings {
            if let Some(value) = lookup(name) {
                *field = Some(value);
            }
        }

        let models: [(&str, &mut String); 4] = [
            ("OPENAI_MODEL", &mut self.openai_model),
            ("MISTRAL_MODEL", &mut self.mistral_model),
            ("AZURE_DOCUMENT_INTELLIGENCE_MODEL", &mut self.azure_model),
            ("LLAMAPARSE_STRUCTURING_MODEL", &mut self.structuring_model),
        ];
        for (name, field) in models {
            if let Some(value) = lookup(name) {
                *field = value;
            }
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Directory for storing uploaded files.
    pub documents_dir: PathBuf,
    pub storage_backend: StorageBackendKind,
    /// Default bind address for `serve`.
    pub bind: String,
    pub upload_limits: UploadLimits,
    /// Delay before a spawned processing run starts.
    pub processing_delay_ms: u64,
    /// Key required on `/api/v1` routes when set.
    pub ingest_api_key: Option<String>,
    pub ocr: OcrSettings,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/Documents/ocrdesk/ for user data
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ocrdesk");

        Self {
            documents_dir: data_dir.join(DOCUMENTS_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            storage_backend: StorageBackendKind::Sqlite,
            bind: "127.0.0.1:3030".to_string(),
            upload_limits: UploadLimits::default(),
            processing_delay_ms: 500,
            ingest_api_key: None,
            ocr: OcrSettings::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            documents_dir: data_dir.join(DOCUMENTS_SUBDIR),
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Get the full path to the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_from(env_opt);
    }

    /// Apply overrides from `lookup`, which returns a variable's value when set.
    ///
    /// Runs after the config file, so the environment wins over file values.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("OCRDESK_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
            self.documents_dir = self.data_dir.join(DOCUMENTS_SUBDIR);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Some(backend) = lookup("OCRDESK_STORAGE") {
            match backend.to_lowercase().as_str() {
                "memory" => self.storage_backend = StorageBackendKind::Memory,
                "sqlite" => self.storage_backend = StorageBackendKind::Sqlite,
                other => tracing::warn!("Ignoring unknown OCRDESK_STORAGE value: {}", other),
            }
        }
        if let Some(key) = lookup("OCRDESK_API_KEY") {
            self.ingest_api_key = Some(key);
        }
        if let Some(delay) = lookup("OCRDESK_PROCESSING_DELAY_MS").and_then(|v| v.trim().parse().ok())
        {
            self.processing_delay_ms = delay;
        }
        self.ocr.apply_env_from(&lookup);
    }

    /// Ensure all directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (dir, label) in [(&self.data_dir, "data"), (&self.documents_dir, "documents")] {
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create {} directory '{}': {}",
                        label,
                        dir.display(),
                        e
                    ),
                )
            })?;
        }
        Ok(())
    }
}

/// Config file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory (relative paths resolve against the config file).
    pub data_dir: Option<String>,
    /// Documents directory (defaults to `<data_dir>/documents`).
    pub documents_dir: Option<String>,
    /// Database URL.
    pub database: Option<String>,
    pub storage: Option<StorageBackendKind>,
    pub bind: Option<String>,
    pub max_upload_bytes: Option<usize>,
    pub max_files_per_upload: Option<usize>,
    pub processing_delay_ms: Option<u64>,
    pub ingest_api_key: Option<String>,
    pub ocr: Option<OcrSettings>,

    /// Path the config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse config text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        Ok(match ext {
            "toml" => toml::from_str(contents)?,
            "yaml" | "yml" => serde_yaml::from_str(contents)?,
            _ => serde_json::from_str(contents)?,
        })
    }

    /// Find a config file in the given directories.
    pub fn discover(dirs: &[PathBuf]) -> Option<PathBuf> {
        dirs.iter().find_map(|dir| {
            CONFIG_EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{}.{}", CONFIG_STEM, ext)))
                .find(|p| p.is_file())
        })
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path relative to the config file location.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let path = PathBuf::from(path_str);
        if path.is_absolute() {
            path
        } else {
            base_dir.join(path)
        }
    }

    /// Apply config values on top of settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            let data_dir = self.resolve_path(data_dir, base_dir);
            settings.documents_dir = data_dir.join(DOCUMENTS_SUBDIR);
            settings.data_dir = data_dir;
        }
        if let Some(ref documents_dir) = self.documents_dir {
            settings.documents_dir = self.resolve_path(documents_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_url = Some(database.clone());
        }
        if let Some(storage) = self.storage {
            settings.storage_backend = storage;
        }
        if let Some(ref bind) = self.bind {
            settings.bind = bind.clone();
        }
        if let Some(max) = self.max_upload_bytes {
            settings.upload_limits.max_file_bytes = max;
        }
        if let Some(max) = self.max_files_per_upload {
            settings.upload_limits.max_files = max;
        }
        if let Some(delay) = self.processing_delay_ms {
            settings.processing_delay_ms = delay;
        }
        if let Some(ref key) = self.ingest_api_key {
            settings.ingest_api_key = Some(key.clone());
        }
        if let Some(ref ocr) = self.ocr {
            settings.ocr = ocr.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Default)]
pub struct LoadOptions {
    /// Explicit config file path (skips discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory override from the command line.
    pub target: Option<PathBuf>,
}

/// Resolve settings from defaults, config file, environment and CLI overrides.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    let mut settings = Settings::default();

    let config_path = options.config_path.clone().or_else(|| {
        let mut search = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            search.push(cwd);
        }
        search.push(settings.data_dir.clone());
        Config::discover(&search)
    });

    let config = match config_path {
        Some(path) => {
            tracing::info!("Loading config from {}", path.display());
            Config::load_from_path(&path).await?
        }
        None => Config::default(),
    };

    let base_dir = config
        .base_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides();

    if let Some(target) = options.target {
        settings.documents_dir = target.join(DOCUMENTS_SUBDIR);
        settings.data_dir = target;
    }

    Ok((settings, config))
}
