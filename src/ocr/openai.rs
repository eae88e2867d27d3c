//! OpenAI vision provider.
//!
//! Sends the document to the chat completions API and asks for invoice JSON.
//! Images go as `image_url` data URIs, PDFs as inline `file` parts.
//! Requires OPENAI_API_KEY environment variable.
//!
//! Rate limiting:
//! - Set OPENAI_DELAY_MS to configure delay between requests (default: 0ms)
//! - Automatically retries on 429 with exponential backoff

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::api_backend::{apply_rate_delay, encode_data_uri, http_client};
use super::backend::{DocumentInput, OcrError, OcrOutcome, OcrProvider, OcrProviderKind};
use super::chat::{
    self, ChatContent, ChatMessage, ChatRequest, ImageUrl, InlineFile, ResponseFormat,
    INVOICE_EXTRACTION_PROMPT,
};
use super::normalize::{extract_json, from_llm_json};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI vision provider.
pub struct OpenAiVisionProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl Default for OpenAiVisionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiVisionProvider {
    /// Create a provider reading OPENAI_API_KEY and OPENAI_MODEL from the environment.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: OPENAI_CHAT_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model (e.g., "gpt-4o", "gpt-4o-mini").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Override the chat completions URL (OpenAI-compatible gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn document_part(input: &DocumentInput) -> Result<ChatContent, OcrError> {
        if input.is_pdf() {
            Ok(ChatContent::File {
                file: InlineFile {
                    filename: input.filename.clone(),
                    file_data: encode_data_uri(&input.mime_type, &input.bytes),
                },
            })
        } else if input.mime_type.starts_with("image/") {
            Ok(ChatContent::ImageUrl {
                image_url: ImageUrl {
                    url: encode_data_uri(&input.mime_type, &input.bytes),
                },
            })
        } else {
            Err(OcrError::UnsupportedFile(
                OcrProviderKind::OpenAi,
                input.mime_type.clone(),
            ))
        }
    }
}

#[async_trait]
impl OcrProvider for OpenAiVisionProvider {
    fn kind(&self) -> OcrProviderKind {
        OcrProviderKind::OpenAi
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.api_key.is_some() {
            format!("OpenAI vision is configured with model {}", self.model)
        } else {
            "OPENAI_API_KEY not set. Get an API key from https://platform.openai.com/api-keys"
                .to_string()
        }
    }

    async fn extract(&self, input: &DocumentInput) -> Result<OcrOutcome, OcrError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            OcrError::NotConfigured(OcrProviderKind::OpenAi, "OPENAI_API_KEY not set".to_string())
        })?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(vec![
                ChatContent::Text {
                    text: INVOICE_EXTRACTION_PROMPT.to_string(),
                },
                Self::document_part(input)?,
            ])],
            max_tokens: 4096,
            temperature: 0.1,
            response_format: ResponseFormat::json_object(),
        };

        let client = http_client(OcrProviderKind::OpenAi, self.timeout)?;
        apply_rate_delay("OPENAI_DELAY_MS", 0, OcrProviderKind::OpenAi).await;

        let started = Instant::now();
        let reply = chat::complete(
            OcrProviderKind::OpenAi,
            &client,
            &self.base_url,
            api_key,
            &request,
        )
        .await?;
        debug!(
            "openai: extracted {} in {:?}",
            input.filename,
            started.elapsed()
        );

        let value = extract_json(&reply.content).ok_or_else(|| {
            warn!("openai: response for {} was not JSON", input.filename);
            OcrError::InvalidResponse(
                OcrProviderKind::OpenAi,
                "could not parse JSON from model output".to_string(),
            )
        })?;

        Ok(OcrOutcome {
            fields: from_llm_json(&value),
            model: reply.model.or_else(|| Some(self.model.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_follows_api_key() {
        let provider = OpenAiVisionProvider {
            api_key: None,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: OPENAI_CHAT_URL.to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(!provider.is_available());
        assert!(provider.availability_hint().contains("OPENAI_API_KEY"));

        let provider = provider.with_api_key("sk-test").with_model("gpt-4o-mini");
        assert!(provider.is_available());
        assert!(provider.availability_hint().contains("gpt-4o-mini"));
    }

    #[test]
    fn test_document_part_by_mime() {
        let pdf = DocumentInput::new("a.pdf", "application/pdf", b"%PDF-1.4".to_vec());
        assert!(matches!(
            OpenAiVisionProvider::document_part(&pdf).unwrap(),
            ChatContent::File { .. }
        ));

        let png = DocumentInput::new("a.png", "image/png", vec![0x89, b'P']);
        assert!(matches!(
            OpenAiVisionProvider::document_part(&png).unwrap(),
            ChatContent::ImageUrl { .. }
        ));

        let txt = DocumentInput::new("a.txt", "text/plain", b"hi".to_vec());
        assert!(OpenAiVisionProvider::document_part(&txt).is_err());
    }

    #[tokio::test]
    async fn test_extract_without_key_is_not_configured() {
        let provider = OpenAiVisionProvider {
            api_key: None,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: OPENAI_CHAT_URL.to_string(),
            timeout: Duration::from_secs(1),
        };
        let input = DocumentInput::new("a.png", "image/png", vec![1, 2, 3]);
        assert!(matches!(
            provider.extract(&input).await,
            Err(OcrError::NotConfigured(OcrProviderKind::OpenAi, _))
        ));
    }
}
