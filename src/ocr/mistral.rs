//! Mistral provider.
//!
//! Images are sent inline as `image_url` data URIs. PDFs are uploaded to the
//! files API, referenced through a short-lived signed URL as `document_url`,
//! and deleted again once the completion returns.
//! Requires MISTRAL_API_KEY environment variable.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::api_backend::{
    apply_rate_delay, encode_data_uri, ensure_success, http_client, map_reqwest_error,
    retry_on_rate_limit,
};
use super::backend::{DocumentInput, OcrError, OcrOutcome, OcrProvider, OcrProviderKind};
use super::chat::{
    self, ChatContent, ChatMessage, ChatRequest, ImageUrl, ResponseFormat,
    INVOICE_EXTRACTION_PROMPT,
};
use super::normalize::{extract_json, from_llm_json};

pub const DEFAULT_MISTRAL_MODEL: &str = "mistral-small-latest";
const MISTRAL_API_BASE: &str = "https://api.mistral.ai/v1";

/// Hours a signed file URL stays valid.
const SIGNED_URL_EXPIRY_HOURS: u32 = 1;

/// Mistral chat provider.
pub struct MistralProvider {
    api_key: Option<String>,
    model: String,
    api_base: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: String,
}

impl Default for MistralProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MistralProvider {
    /// Create a provider reading MISTRAL_API_KEY and MISTRAL_MODEL from the environment.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("MISTRAL_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("MISTRAL_MODEL")
                .unwrap_or_else(|_| DEFAULT_MISTRAL_MODEL.to_string()),
            api_base: MISTRAL_API_BASE.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model (e.g., "mistral-small-latest", "pixtral-large-latest").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Upload a PDF and return its file id and a signed URL.
    async fn upload_document(
        &self,
        client: &reqwest::Client,
        api_key: &str,
        input: &DocumentInput,
    ) -> Result<(String, String), OcrError> {
        let kind = OcrProviderKind::Mistral;
        let upload_url = format!("{}/files", self.api_base);

        let response = retry_on_rate_limit(kind, || {
            let part = reqwest::multipart::Part::bytes(input.bytes.clone())
                .file_name(input.filename.clone());
            let part = match part.mime_str(&input.mime_type) {
                Ok(p) => p,
                Err(_) => reqwest::multipart::Part::bytes(input.bytes.clone())
                    .file_name(input.filename.clone()),
            };
            let form = reqwest::multipart::Form::new()
                .text("purpose", "ocr")
                .part("file", part);
            client
                .post(&upload_url)
                .bearer_auth(api_key)
                .multipart(form)
                .send()
        })
        .await?;
        let uploaded: UploadedFile = ensure_success(kind, response)
            .await?
            .json()
            .await
            .map_err(|e| map_reqwest_error(kind, e))?;
        debug!("mistral: uploaded {} as {}", input.filename, uploaded.id);

        let url_endpoint = format!(
            "{}/files/{}/url?expiry={}",
            self.api_base, uploaded.id, SIGNED_URL_EXPIRY_HOURS
        );
        let signed = async {
            let response = retry_on_rate_limit(kind, || {
                client.get(&url_endpoint).bearer_auth(api_key).send()
            })
            .await?;
            ensure_success(kind, response)
                .await?
                .json::<SignedUrl>()
                .await
                .map_err(|e| map_reqwest_error(kind, e))
        }
        .await;

        match signed {
            Ok(signed) => Ok((uploaded.id, signed.url)),
            Err(e) => {
                self.delete_file(client, api_key, &uploaded.id).await;
                Err(e)
            }
        }
    }

    /// Remove an uploaded file. Failures are logged, not returned.
    async fn delete_file(&self, client: &reqwest::Client, api_key: &str, file_id: &str) {
        let url = format!("{}/files/{}", self.api_base, file_id);
        match client.delete(&url).bearer_auth(api_key).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!("mistral: deleted uploaded file {}", file_id)
            }
            Ok(resp) => warn!(
                "mistral: failed to delete uploaded file {}: HTTP {}",
                file_id,
                resp.status()
            ),
            Err(e) => warn!("mistral: failed to delete uploaded file {}: {}", file_id, e),
        }
    }
}

#[async_trait]
impl OcrProvider for MistralProvider {
    fn kind(&self) -> OcrProviderKind {
        OcrProviderKind::Mistral
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        if self.api_key.is_some() {
            format!("Mistral is configured with model {}", self.model)
        } else {
            "MISTRAL_API_KEY not set. Get an API key from https://console.mistral.ai/".to_string()
        }
    }

    async fn extract(&self, input: &DocumentInput) -> Result<OcrOutcome, OcrError> {
        let kind = OcrProviderKind::Mistral;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| OcrError::NotConfigured(kind, "MISTRAL_API_KEY not set".to_string()))?;

        if !input.is_pdf() && !input.mime_type.starts_with("image/") {
            return Err(OcrError::UnsupportedFile(kind, input.mime_type.clone()));
        }

        let client = http_client(kind, self.timeout)?;
        apply_rate_delay("MISTRAL_DELAY_MS", 0, kind).await;

        let (document_part, uploaded_id) = if input.is_pdf() {
            let (file_id, url) = self.upload_document(&client, api_key, input).await?;
            (ChatContent::DocumentUrl { document_url: url }, Some(file_id))
        } else {
            (
                ChatContent::ImageUrl {
                    image_url: ImageUrl {
                        url: encode_data_uri(&input.mime_type, &input.bytes),
                    },
                },
                None,
            )
        };

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::user(vec![
                ChatContent::Text {
                    text: INVOICE_EXTRACTION_PROMPT.to_string(),
                },
                document_part,
            ])],
            max_tokens: 4096,
            temperature: 0.1,
            response_format: ResponseFormat::json_object(),
        };

        let url = format!("{}/chat/completions", self.api_base);
        let reply = chat::complete(kind, &client, &url, api_key, &request).await;

        if let Some(file_id) = uploaded_id {
            self.delete_file(&client, api_key, &file_id).await;
        }
        let reply = reply?;

        let value = extract_json(&reply.content).ok_or_else(|| {
            OcrError::InvalidResponse(kind, "could not parse JSON from model output".to_string())
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

    fn unconfigured() -> MistralProvider {
        MistralProvider {
            api_key: None,
            model: DEFAULT_MISTRAL_MODEL.to_string(),
            api_base: MISTRAL_API_BASE.to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_availability_follows_api_key() {
        let provider = unconfigured();
        assert!(!provider.is_available());
        assert!(provider.availability_hint().contains("MISTRAL_API_KEY"));
        assert!(provider.with_api_key("k").is_available());
    }

    #[tokio::test]
    async fn test_rejects_unsupported_types_before_network() {
        let provider = unconfigured().with_api_key("k");
        let input = DocumentInput::new("notes.txt", "text/plain", b"hello".to_vec());
        assert!(matches!(
            provider.extract(&input).await,
            Err(OcrError::UnsupportedFile(OcrProviderKind::Mistral, _))
        ));
    }
}
