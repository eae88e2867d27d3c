//! LlamaParse provider.
//!
//! Two stages: the document is parsed to Markdown by LlamaParse, then an
//! OpenAI chat model turns that Markdown into invoice JSON.
//! Requires LLAMA_CLOUD_API_KEY and OPENAI_API_KEY environment variables.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::api_backend::{
    apply_rate_delay, ensure_success, http_client, map_reqwest_error, retry_on_rate_limit,
};
use super::backend::{DocumentInput, OcrError, OcrOutcome, OcrProvider, OcrProviderKind};
use super::chat::{self, ChatContent, ChatMessage, ChatRequest, ResponseFormat};
use super::normalize::{extract_json, from_llm_json, ReportedConfidence};

const LLAMA_CLOUD_API_BASE: &str = "https://api.cloud.llamaindex.ai/api/v1/parsing";
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_STRUCTURING_MODEL: &str = "gpt-4o-mini";

const STRUCTURING_SYSTEM_PROMPT: &str =
    "You convert parsed invoice and receipt text into structured JSON. Respond with JSON only.";

const STRUCTURING_PROMPT: &str = r#"Extract the following from the document text below and respond with one JSON object:
{
  "company_name": string,
  "address": string,
  "date": string,
  "due_date": string,
  "invoice_numbers_or_po_numbers": [string],
  "currency": string,
  "items": [{"name": string, "quantity": number, "price": number, "amount": number}],
  "subtotal": number,
  "tax": number,
  "total_amount": number,
  "handwritten_notes": [string],
  "other": {string: string}
}
Use null for missing values.

Document text:
"#;

/// LlamaParse job state.
#[derive(Debug, Deserialize)]
struct ParseJob {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MarkdownResult {
    markdown: String,
}

/// LlamaParse + LLM structuring provider.
pub struct LlamaParseProvider {
    api_key: Option<String>,
    openai_api_key: Option<String>,
    structuring_model: String,
    poll_interval: Duration,
    max_polls: u32,
    timeout: Duration,
}

impl Default for LlamaParseProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LlamaParseProvider {
    /// Create a provider reading LLAMA_CLOUD_API_KEY and OPENAI_API_KEY from the environment.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("LLAMA_CLOUD_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            structuring_model: DEFAULT_STRUCTURING_MODEL.to_string(),
            poll_interval: Duration::from_secs(2),
            max_polls: 90,
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the LlamaCloud API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the OpenAI key used for the structuring pass.
    pub fn with_openai_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.openai_api_key = Some(api_key.into());
        self
    }

    pub fn with_structuring_model(mut self, model: impl Into<String>) -> Self {
        self.structuring_model = model.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn parse_to_markdown(
        &self,
        client: &reqwest::Client,
        api_key: &str,
        input: &DocumentInput,
    ) -> Result<String, OcrError> {
        let kind = OcrProviderKind::LlamaParse;
        let upload_url = format!("{}/upload", LLAMA_CLOUD_API_BASE);

        let response = retry_on_rate_limit(kind, || {
            let part = reqwest::multipart::Part::bytes(input.bytes.clone())
                .file_name(input.filename.clone());
            let form = reqwest::multipart::Form::new().part("file", part);
            client
                .post(&upload_url)
                .bearer_auth(api_key)
                .multipart(form)
                .send()
        })
        .await?;
        let job: ParseJob = ensure_success(kind, response)
            .await?
            .json()
            .await
            .map_err(|e| map_reqwest_error(kind, e))?;
        info!("llamaparse: job {} started for {}", job.id, input.filename);

        let job_url = format!("{}/job/{}", LLAMA_CLOUD_API_BASE, job.id);
        let mut finished = false;
        for attempt in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;
            let response = retry_on_rate_limit(kind, || {
                client.get(&job_url).bearer_auth(api_key).send()
            })
            .await?;
            let state: ParseJob = ensure_success(kind, response)
                .await?
                .json()
                .await
                .map_err(|e| map_reqwest_error(kind, e))?;
            debug!("llamaparse: poll {} status {}", attempt + 1, state.status);

            match state.status.as_str() {
                "SUCCESS" => {
                    finished = true;
                    break;
                }
                "ERROR" | "CANCELED" | "CANCELLED" => {
                    return Err(OcrError::AnalysisFailed(
                        kind,
                        state
                            .error_message
                            .unwrap_or_else(|| format!("parse job {}", state.status)),
                    ));
                }
                _ => {}
            }
        }
        if !finished {
            return Err(OcrError::AnalysisFailed(
                kind,
                format!("parse timeout after {} polls", self.max_polls),
            ));
        }

        let result_url = format!("{}/result/markdown", job_url);
        let response = retry_on_rate_limit(kind, || {
            client.get(&result_url).bearer_auth(api_key).send()
        })
        .await?;
        let result: MarkdownResult = ensure_success(kind, response)
            .await?
            .json()
            .await
            .map_err(|e| map_reqwest_error(kind, e))?;
        Ok(result.markdown)
    }
}

/// Fixed confidence for LlamaParse output, which carries no scores of its own.
fn llamaparse_confidence() -> ReportedConfidence {
    ReportedConfidence {
        vendor_info: Some(90.0),
        invoice_details: Some(85.0),
        line_items: Some(80.0),
        totals: Some(90.0),
        handwritten_notes: Some(70.0),
        ..Default::default()
    }
}

#[async_trait]
impl OcrProvider for LlamaParseProvider {
    fn kind(&self) -> OcrProviderKind {
        OcrProviderKind::LlamaParse
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some() && self.openai_api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        match (&self.api_key, &self.openai_api_key) {
            (Some(_), Some(_)) => format!(
                "LlamaParse is configured, structuring with {}",
                self.structuring_model
            ),
            (None, _) => {
                "LLAMA_CLOUD_API_KEY not set. Get an API key from https://cloud.llamaindex.ai/"
                    .to_string()
            }
            (_, None) => "OPENAI_API_KEY not set (required for structuring)".to_string(),
        }
    }

    async fn extract(&self, input: &DocumentInput) -> Result<OcrOutcome, OcrError> {
        let kind = OcrProviderKind::LlamaParse;
        let (api_key, openai_key) = match (&self.api_key, &self.openai_api_key) {
            (Some(a), Some(o)) => (a.as_str(), o.as_str()),
            _ => return Err(OcrError::NotConfigured(kind, self.availability_hint())),
        };

        let client = http_client(kind, self.timeout)?;
        apply_rate_delay("LLAMAPARSE_DELAY_MS", 0, kind).await;

        let markdown = self.parse_to_markdown(&client, api_key, input).await?;
        if markdown.trim().is_empty() {
            return Err(OcrError::InvalidResponse(
                kind,
                "parser returned no text".to_string(),
            ));
        }

        let request = ChatRequest {
            model: self.structuring_model.clone(),
            messages: vec![
                ChatMessage::system(STRUCTURING_SYSTEM_PROMPT),
                ChatMessage::user(vec![ChatContent::Text {
                    text: format!("{}{}", STRUCTURING_PROMPT, markdown),
                }]),
            ],
            max_tokens: 4096,
            temperature: 0.0,
            response_format: ResponseFormat::json_object(),
        };
        let reply = chat::complete(kind, &client, OPENAI_CHAT_URL, openai_key, &request).await?;

        let value = extract_json(&reply.content).ok_or_else(|| {
            OcrError::InvalidResponse(kind, "could not parse JSON from structuring output".to_string())
        })?;

        let mut fields = from_llm_json(&value);
        if fields.reported_confidence == ReportedConfidence::default() {
            fields.reported_confidence = llamaparse_confidence();
        }
        if fields.document_type.is_none() {
            fields.document_type = Some("invoice".to_string());
        }

        Ok(OcrOutcome {
            fields,
            model: Some(self.structuring_model.clone()),
        })
    }
}
