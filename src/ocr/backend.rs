//! OCR provider abstraction.
//!
//! Supports multiple third-party extraction services:
//! - OpenAI: vision chat completions returning invoice JSON
//! - Mistral: vision/document chat completions returning invoice JSON
//! - Azure: Document Intelligence prebuilt invoice model
//! - LlamaParse: document parsing followed by an LLM structuring pass

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::normalize::ExtractedInvoice;

/// Errors from OCR providers.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("{0} is not configured: {1}")]
    NotConfigured(OcrProviderKind, String),

    #[error("{provider} request failed with HTTP {status}: {message}")]
    Http {
        provider: OcrProviderKind,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_secs:?}s")]
    RateLimited {
        provider: OcrProviderKind,
        retry_after_secs: Option<u64>,
    },

    #[error("{0} request timed out")]
    Timeout(OcrProviderKind),

    #[error("{0} network error: {1}")]
    Network(OcrProviderKind, String),

    #[error("{0} returned an invalid response: {1}")]
    InvalidResponse(OcrProviderKind, String),

    #[error("{0} failed to analyze document: {1}")]
    AnalysisFailed(OcrProviderKind, String),

    #[error("Unsupported file type for {0}: {1}")]
    UnsupportedFile(OcrProviderKind, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Available OCR provider types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrProviderKind {
    /// OpenAI vision chat completions.
    #[serde(alias = "gpt", alias = "gpt-4o")]
    OpenAi,
    /// Mistral chat completions with image/document input.
    Mistral,
    /// Azure Document Intelligence.
    #[serde(alias = "azure-document-intelligence")]
    Azure,
    /// LlamaParse document parsing.
    #[serde(alias = "llama", alias = "llama-parse")]
    LlamaParse,
}

impl OcrProviderKind {
    pub const ALL: [OcrProviderKind; 4] = [
        Self::OpenAi,
        Self::Mistral,
        Self::Azure,
        Self::LlamaParse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Mistral => "mistral",
            Self::Azure => "azure",
            Self::LlamaParse => "llamaparse",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "gpt" | "gpt-4o" => Some(Self::OpenAi),
            "mistral" => Some(Self::Mistral),
            "azure" | "azure-document-intelligence" | "document-intelligence" => {
                Some(Self::Azure)
            }
            "llamaparse" | "llama" | "llama-parse" => Some(Self::LlamaParse),
            _ => None,
        }
    }

    /// Human-readable engine name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI Vision",
            Self::Mistral => "Mistral",
            Self::Azure => "Azure Document Intelligence",
            Self::LlamaParse => "LlamaParse",
        }
    }
}

impl std::fmt::Display for OcrProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// File handed to a provider.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentInput {
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a local file, guessing its MIME type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, OcrError> {
        let bytes = tokio::fs::read(path).await?;
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Ok(Self {
            filename,
            mime_type,
            bytes,
        })
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == "application/pdf"
    }
}

/// What a provider produced for one document.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub fields: ExtractedInvoice,
    /// Model used, when the provider is model-based.
    pub model: Option<String>,
}

/// Trait for OCR providers.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Get the provider type.
    fn kind(&self) -> OcrProviderKind;

    /// Check if this provider is usable (credentials present).
    fn is_available(&self) -> bool;

    /// Get a description of what's needed to make this provider available.
    fn availability_hint(&self) -> String;

    /// Extract structured invoice data from a document.
    async fn extract(&self, input: &DocumentInput) -> Result<OcrOutcome, OcrError>;
}

/// Registry of configured providers with a default selection.
#[derive(Clone)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn OcrProvider>>,
    default: OcrProviderKind,
}

impl ProviderRegistry {
    /// Create an empty registry with the given default provider.
    pub fn new(default: OcrProviderKind) -> Self {
        Self {
            providers: Vec::new(),
            default,
        }
    }

    /// Register a provider, replacing any existing one of the same kind.
    pub fn register(&mut self, provider: Arc<dyn OcrProvider>) {
        let kind = provider.kind();
        self.providers.retain(|p| p.kind() != kind);
        self.providers.push(provider);
    }

    pub fn default_kind(&self) -> OcrProviderKind {
        self.default
    }

    /// Get a specific provider by type.
    pub fn get(&self, kind: OcrProviderKind) -> Option<Arc<dyn OcrProvider>> {
        self.providers.iter().find(|p| p.kind() == kind).cloned()
    }

    /// List all registered providers.
    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn OcrProvider>> {
        self.providers.iter()
    }

    /// Kinds of providers that can actually run.
    pub fn available(&self) -> Vec<OcrProviderKind> {
        self.providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.kind())
            .collect()
    }

    /// Resolve the provider to use for a request, falling back to the default.
    pub fn resolve(
        &self,
        requested: Option<OcrProviderKind>,
    ) -> Result<Arc<dyn OcrProvider>, OcrError> {
        let kind = requested.unwrap_or(self.default);
        let provider = self.get(kind).ok_or_else(|| {
            OcrError::NotConfigured(kind, "provider is not registered".to_string())
        })?;
        if !provider.is_available() {
            return Err(OcrError::NotConfigured(kind, provider.availability_hint()));
        }
        Ok(provider)
    }
}
