//! OpenAI-compatible chat completion wire types.
//!
//! OpenAI and Mistral both accept this request shape; the content parts
//! differ in which document types each vendor understands.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::api_backend::{ensure_success, map_reqwest_error, retry_on_rate_limit};
use super::backend::{OcrError, OcrProviderKind};

/// Prompt asking a vision model for invoice JSON.
pub const INVOICE_EXTRACTION_PROMPT: &str = r#"You are an expert at reading invoices and receipts, including handwritten annotations.
Extract the data from this document and respond with a single JSON object using exactly these keys:
{
  "vendorName": string, "vendorAddress": string, "vendorContact": string,
  "customerName": string, "customerAddress": string,
  "invoiceNumber": string, "invoiceDate": "YYYY-MM-DD", "dueDate": "YYYY-MM-DD",
  "currency": ISO 4217 code,
  "subtotal": number, "taxAmount": number, "discount": number, "totalAmount": number,
  "lineItems": [{"description": string, "quantity": number, "unitPrice": number, "amount": number}],
  "handwrittenNotes": [{"text": string, "confidence": number 0-100}],
  "confidenceScores": {"overall": number, "vendorInfo": number, "invoiceDetails": number, "lineItems": number, "totals": number, "handwrittenNotes": number},
  "documentType": "invoice" | "receipt" | "other"
}
Use null for anything you cannot read. Numbers must be plain numbers without currency symbols. Do not add commentary."#;

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ResponseFormat {
    pub fn json_object() -> Option<Self> {
        Some(Self {
            kind: "json_object",
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: Vec<ChatContent>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: vec![ChatContent::Text { text: text.into() }],
        }
    }

    pub fn user(content: Vec<ChatContent>) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ChatContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
    /// Inline file (OpenAI PDF input).
    #[serde(rename = "file")]
    File { file: InlineFile },
    /// Remote document (Mistral document understanding).
    #[serde(rename = "document_url")]
    DocumentUrl { document_url: String },
}

#[derive(Debug, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct InlineFile {
    pub filename: String,
    pub file_data: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Text of the first choice plus the model the vendor reports having used.
#[derive(Debug)]
pub struct ChatReply {
    pub content: String,
    pub model: Option<String>,
}

/// Send a chat completion request, retrying on rate limits.
pub async fn complete(
    provider: OcrProviderKind,
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    request: &ChatRequest,
) -> Result<ChatReply, OcrError> {
    debug!("{}: chat completion with model {}", provider, request.model);

    let response = retry_on_rate_limit(provider, || {
        client.post(url).bearer_auth(api_key).json(request).send()
    })
    .await?;
    let response = ensure_success(provider, response).await?;

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| map_reqwest_error(provider, e))?;

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| OcrError::InvalidResponse(provider, "no content in response".to_string()))?;

    Ok(ChatReply {
        content,
        model: parsed.model,
    })
}
