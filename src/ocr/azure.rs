//! Azure Document Intelligence provider.
//!
//! Submits the file to the `prebuilt-invoice` model, then polls the
//! `Operation-Location` URL until analysis finishes. Invoice fields, line
//! items and per-field confidence come from the analyzed document; handwritten
//! notes come from handwriting style spans; page lines become layout regions.
//!
//! Requires AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT and
//! AZURE_DOCUMENT_INTELLIGENCE_KEY environment variables.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::api_backend::{
    apply_rate_delay, ensure_success, http_client, map_reqwest_error, retry_on_rate_limit,
};
use super::backend::{DocumentInput, OcrError, OcrOutcome, OcrProvider, OcrProviderKind};
use super::confidence::to_percent;
use super::normalize::{coerce_number, coerce_text, normalize_date, ExtractedInvoice};
use crate::models::{HandwrittenNote, LayoutRegion, LineItem};

pub const DEFAULT_AZURE_MODEL: &str = "prebuilt-invoice";
pub const AZURE_API_VERSION: &str = "2024-11-30";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Azure Document Intelligence provider.
pub struct AzureDocumentIntelligenceProvider {
    endpoint: Option<String>,
    api_key: Option<String>,
    model_id: String,
    poll_interval: Duration,
    max_polls: u32,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    error: Option<AnalyzeError>,
    #[serde(default)]
    analyze_result: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl Default for AzureDocumentIntelligenceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AzureDocumentIntelligenceProvider {
    /// Create a provider reading endpoint and key from the environment.
    pub fn new() -> Self {
        Self {
            endpoint: std::env::var("AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT")
                .ok()
                .filter(|s| !s.is_empty()),
            api_key: std::env::var("AZURE_DOCUMENT_INTELLIGENCE_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
            model_id: DEFAULT_AZURE_MODEL.to_string(),
            poll_interval: Duration::from_secs(1),
            max_polls: 60,
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the resource endpoint (e.g., "https://myresource.cognitiveservices.azure.com").
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the analysis model (e.g., "prebuilt-invoice", "prebuilt-receipt").
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Set polling cadence and the maximum number of polls.
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    /// Span offsets come back as Unicode code points, matching `char` indexing.
    fn analyze_url(&self, endpoint: &str) -> String {
        format!(
            "{}/documentintelligence/documentModels/{}:analyze?api-version={}&stringIndexType=unicodeCodePoint",
            endpoint.trim_end_matches('/'),
            self.model_id,
            AZURE_API_VERSION
        )
    }

    async fn poll(
        &self,
        client: &reqwest::Client,
        api_key: &str,
        operation_url: &str,
    ) -> Result<Value, OcrError> {
        let kind = OcrProviderKind::Azure;
        for attempt in 0..self.max_polls {
            tokio::time::sleep(self.poll_interval).await;

            let response = retry_on_rate_limit(kind, || {
                client
                    .get(operation_url)
                    .header(SUBSCRIPTION_KEY_HEADER, api_key)
                    .send()
            })
            .await?;
            let operation: AnalyzeOperation = ensure_success(kind, response)
                .await?
                .json()
                .await
                .map_err(|e| map_reqwest_error(kind, e))?;

            debug!("azure: poll {} status {}", attempt + 1, operation.status);
            match operation.status.as_str() {
                "succeeded" => {
                    return operation.analyze_result.ok_or_else(|| {
                        OcrError::InvalidResponse(kind, "missing analyzeResult".to_string())
                    })
                }
                "failed" | "canceled" => {
                    let message = operation
                        .error
                        .map(|e| {
                            format!(
                                "{}: {}",
                                e.code.unwrap_or_else(|| "Error".to_string()),
                                e.message.unwrap_or_default()
                            )
                        })
                        .unwrap_or_else(|| operation.status.clone());
                    return Err(OcrError::AnalysisFailed(kind, message));
                }
                _ => {}
            }
        }
        Err(OcrError::AnalysisFailed(
            kind,
            format!("analysis timeout after {} polls", self.max_polls),
        ))
    }
}

#[async_trait]
impl OcrProvider for AzureDocumentIntelligenceProvider {
    fn kind(&self) -> OcrProviderKind {
        OcrProviderKind::Azure
    }

    fn is_available(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }

    fn availability_hint(&self) -> String {
        match (&self.endpoint, &self.api_key) {
            (Some(endpoint), Some(_)) => format!(
                "Azure Document Intelligence is configured at {} with model {}",
                endpoint, self.model_id
            ),
            (None, _) => "AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT not set".to_string(),
            (_, None) => "AZURE_DOCUMENT_INTELLIGENCE_KEY not set".to_string(),
        }
    }

    async fn extract(&self, input: &DocumentInput) -> Result<OcrOutcome, OcrError> {
        let kind = OcrProviderKind::Azure;
        let (endpoint, api_key) = match (&self.endpoint, &self.api_key) {
            (Some(e), Some(k)) => (e.as_str(), k.as_str()),
            _ => return Err(OcrError::NotConfigured(kind, self.availability_hint())),
        };

        let client = http_client(kind, self.timeout)?;
        apply_rate_delay("AZURE_DELAY_MS", 0, kind).await;

        let url = self.analyze_url(endpoint);
        let response = retry_on_rate_limit(kind, || {
            client
                .post(&url)
                .header(SUBSCRIPTION_KEY_HEADER, api_key)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(input.bytes.clone())
                .send()
        })
        .await?;
        let response = ensure_success(kind, response).await?;

        let operation_url = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                OcrError::InvalidResponse(kind, "missing Operation-Location header".to_string())
            })?;
        info!("azure: analysis started for {}", input.filename);

        let result = self.poll(&client, api_key, &operation_url).await?;
        Ok(OcrOutcome {
            fields: map_analyze_result(&result),
            model: Some(self.model_id.clone()),
        })
    }
}

fn field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    fields.get(name).filter(|v| !v.is_null())
}

/// Typed value of an analyzed field, falling back to its raw content.
fn field_text(field: &Value) -> Option<String> {
    [
        "valueString",
        "valueDate",
        "valuePhoneNumber",
        "valueCountryRegion",
    ]
    .iter()
    .find_map(|key| field.get(*key).and_then(coerce_text))
    .or_else(|| field.get("content").and_then(coerce_text))
}

fn field_number(field: &Value) -> Option<f64> {
    field
        .get("valueCurrency")
        .and_then(|c| c.get("amount"))
        .and_then(coerce_number)
        .or_else(|| field.get("valueNumber").and_then(coerce_number))
        .or_else(|| field.get("valueInteger").and_then(coerce_number))
        .or_else(|| field.get("content").and_then(coerce_number))
}

fn field_confidence(field: &Value) -> Option<f64> {
    field.get("confidence").and_then(Value::as_f64).map(to_percent)
}

/// Members of an object-typed field (`valueObject`, or `properties` in older API versions).
fn object_members(value: &Value) -> Option<&Map<String, Value>> {
    value
        .get("valueObject")
        .or_else(|| value.get("properties"))
        .and_then(Value::as_object)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some((values.iter().sum::<f64>() / values.len() as f64 * 100.0).round() / 100.0)
    }
}

/// Map an `analyzeResult` payload into the common invoice shape.
pub fn map_analyze_result(result: &Value) -> ExtractedInvoice {
    let mut out = ExtractedInvoice::default();

    let document = result
        .get("documents")
        .and_then(Value::as_array)
        .and_then(|docs| docs.first());

    if let Some(doc) = document {
        out.document_type = doc.get("docType").and_then(coerce_text);
    }

    let empty = Map::new();
    let fields = document
        .and_then(|d| d.get("fields"))
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut field_conf = BTreeMap::new();
    for (azure_name, our_name, slot) in [
        ("VendorName", "vendorName", &mut out.vendor_name),
        ("VendorAddress", "vendorAddress", &mut out.vendor_address),
        ("CustomerName", "customerName", &mut out.customer_name),
        ("CustomerAddress", "customerAddress", &mut out.customer_address),
        ("InvoiceId", "invoiceNumber", &mut out.invoice_number),
    ] {
        if let Some(f) = field(fields, azure_name) {
            *slot = field_text(f);
            if let Some(c) = field_confidence(f) {
                field_conf.insert(our_name.to_string(), c);
            }
        }
    }
    if out.vendor_name.is_none() {
        out.vendor_name = field(fields, "VendorAddressRecipient").and_then(field_text);
    }
    if let Some(po) = field(fields, "PurchaseOrder").and_then(field_text) {
        out.additional_info.insert("purchaseOrder".to_string(), po);
    }
    out.vendor_contact = ["VendorPhoneNumber", "VendorEmail", "VendorWebsite"]
        .iter()
        .find_map(|name| field(fields, name).and_then(field_text));

    for (azure_name, our_name, slot) in [
        ("InvoiceDate", "invoiceDate", &mut out.invoice_date),
        ("DueDate", "dueDate", &mut out.due_date),
    ] {
        if let Some(f) = field(fields, azure_name) {
            *slot = field_text(f).map(|d| normalize_date(&d));
            if let Some(c) = field_confidence(f) {
                field_conf.insert(our_name.to_string(), c);
            }
        }
    }

    for (azure_name, our_name, slot) in [
        ("SubTotal", "subtotal", &mut out.subtotal),
        ("TotalTax", "taxAmount", &mut out.tax_amount),
        ("TotalDiscount", "discount", &mut out.discount),
        ("InvoiceTotal", "totalAmount", &mut out.total_amount),
    ] {
        if let Some(f) = field(fields, azure_name) {
            *slot = field_number(f);
            if let Some(c) = field_confidence(f) {
                field_conf.insert(our_name.to_string(), c);
            }
        }
    }
    if out.total_amount.is_none() {
        out.total_amount = field(fields, "AmountDue").and_then(field_number);
    }

    out.currency = ["InvoiceTotal", "SubTotal", "AmountDue"]
        .iter()
        .find_map(|name| {
            field(fields, name)
                .and_then(|f| f.get("valueCurrency"))
                .and_then(|c| c.get("currencyCode"))
                .and_then(coerce_text)
        })
        .or_else(|| out.total_amount.map(|_| "USD".to_string()));

    let mut item_conf = Vec::new();
    if let Some(items) = field(fields, "Items")
        .and_then(|f| f.get("valueArray"))
        .and_then(Value::as_array)
    {
        for item in items {
            let Some(props) = object_members(item) else {
                continue;
            };
            let description = field(props, "Description")
                .and_then(field_text)
                .unwrap_or_default();
            let quantity = field(props, "Quantity").and_then(field_number);
            let unit_price = field(props, "UnitPrice").and_then(field_number);
            let amount = field(props, "Amount").and_then(field_number);
            if description.is_empty() && amount.is_none() {
                continue;
            }
            if let Some(c) = field_confidence(item) {
                item_conf.push(c);
            }
            out.line_items.push(LineItem {
                description,
                quantity,
                unit_price,
                amount,
                product_code: field(props, "ProductCode").and_then(field_text),
            });
        }
    }

    let content = result
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();
    out.handwritten_notes = handwritten_notes(result, content);
    out.layout = page_lines(result);

    let reported = &mut out.reported_confidence;
    reported.vendor_info = field_conf.get("vendorName").copied();
    reported.invoice_details = mean(
        &["invoiceNumber", "invoiceDate", "dueDate"]
            .iter()
            .filter_map(|k| field_conf.get(*k).copied())
            .collect::<Vec<_>>(),
    );
    reported.line_items = mean(&item_conf);
    reported.totals = field_conf.get("totalAmount").copied();
    reported.field_specific = field_conf;

    out
}

/// Text covered by handwriting style spans.
fn handwritten_notes(result: &Value, content: &str) -> Vec<HandwrittenNote> {
    let Some(styles) = result.get("styles").and_then(Value::as_array) else {
        return Vec::new();
    };
    let chars: Vec<char> = content.chars().collect();

    styles
        .iter()
        .filter(|s| s.get("isHandwritten").and_then(Value::as_bool) == Some(true))
        .flat_map(|style| {
            let confidence = style
                .get("confidence")
                .and_then(Value::as_f64)
                .map(to_percent)
                .unwrap_or(0.0);
            let chars = &chars;
            style
                .get("spans")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(move |span| {
                    let offset = span.get("offset")?.as_u64()? as usize;
                    let length = span.get("length")?.as_u64()? as usize;
                    let end = offset.checked_add(length)?.min(chars.len());
                    if offset >= end {
                        return None;
                    }
                    let text: String = chars[offset..end].iter().collect();
                    let text = text.trim();
                    (!text.is_empty()).then(|| HandwrittenNote {
                        text: text.to_string(),
                        confidence,
                    })
                })
        })
        .collect()
}

/// Page lines with their polygons.
fn page_lines(result: &Value) -> Vec<LayoutRegion> {
    let Some(pages) = result.get("pages").and_then(Value::as_array) else {
        return Vec::new();
    };

    pages
        .iter()
        .flat_map(|page| {
            let number = page
                .get("pageNumber")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            page.get("lines")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(move |line| {
                    let text = line.get("content").and_then(Value::as_str)?.to_string();
                    let bounding_box = line
                        .get("polygon")
                        .and_then(Value::as_array)
                        .map(|p| p.iter().filter_map(Value::as_f64).collect())
                        .unwrap_or_default();
                    Some(LayoutRegion {
                        page: number,
                        text,
                        bounding_box,
                        confidence: None,
                    })
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_result() -> Value {
        json!({
            "content": "ACME LTD\nInvoice INV-42\nPaid by check",
            "pages": [{
                "pageNumber": 1,
                "lines": [
                    {"content": "ACME LTD", "polygon": [1.0, 1.0, 2.0, 1.0, 2.0, 1.5, 1.0, 1.5]},
                    {"content": "Invoice INV-42", "polygon": [1.0, 2.0, 3.0, 2.0, 3.0, 2.5, 1.0, 2.5]}
                ]
            }],
            "styles": [
                {"isHandwritten": true, "confidence": 0.9, "spans": [{"offset": 24, "length": 13}]},
                {"isHandwritten": false, "confidence": 0.99, "spans": [{"offset": 0, "length": 8}]}
            ],
            "documents": [{
                "docType": "invoice",
                "confidence": 0.97,
                "fields": {
                    "VendorName": {"type": "string", "valueString": "ACME LTD", "content": "ACME LTD", "confidence": 0.95},
                    "VendorAddress": {"type": "address", "content": "1 Road, Town", "confidence": 0.9},
                    "InvoiceId": {"type": "string", "valueString": "INV-42", "confidence": 0.93},
                    "InvoiceDate": {"type": "date", "valueDate": "2024-05-01", "content": "May 1, 2024", "confidence": 0.91},
                    "SubTotal": {"type": "currency", "valueCurrency": {"amount": 100.0, "currencyCode": "EUR"}, "confidence": 0.9},
                    "TotalTax": {"type": "currency", "valueCurrency": {"amount": 20.0}, "confidence": 0.9},
                    "InvoiceTotal": {"type": "currency", "valueCurrency": {"amount": 120.0, "currencyCode": "EUR"}, "confidence": 0.88},
                    "Items": {
                        "type": "array",
                        "valueArray": [
                            {"type": "object", "confidence": 0.8, "valueObject": {
                                "Description": {"type": "string", "valueString": "Consulting"},
                                "Quantity": {"type": "number", "valueNumber": 2},
                                "UnitPrice": {"type": "currency", "valueCurrency": {"amount": 50.0}},
                                "Amount": {"type": "currency", "valueCurrency": {"amount": 100.0}},
                                "ProductCode": {"type": "string", "valueString": "C-1"}
                            }},
                            {"type": "object", "properties": {
                                "Description": {"type": "string", "content": "Legacy shape"},
                                "Amount": {"type": "number", "valueNumber": 0}
                            }}
                        ]
                    }
                }
            }]
        })
    }

    #[test]
    fn test_map_invoice_fields() {
        let out = map_analyze_result(&sample_result());
        assert_eq!(out.vendor_name.as_deref(), Some("ACME LTD"));
        assert_eq!(out.vendor_address.as_deref(), Some("1 Road, Town"));
        assert_eq!(out.invoice_number.as_deref(), Some("INV-42"));
        assert_eq!(out.invoice_date.as_deref(), Some("2024-05-01"));
        assert_eq!(out.subtotal, Some(100.0));
        assert_eq!(out.tax_amount, Some(20.0));
        assert_eq!(out.total_amount, Some(120.0));
        assert_eq!(out.currency.as_deref(), Some("EUR"));
        assert_eq!(out.document_type.as_deref(), Some("invoice"));
    }

    #[test]
    fn test_map_line_items_both_shapes() {
        let out = map_analyze_result(&sample_result());
        assert_eq!(out.line_items.len(), 2);
        assert_eq!(out.line_items[0].description, "Consulting");
        assert_eq!(out.line_items[0].quantity, Some(2.0));
        assert_eq!(out.line_items[0].unit_price, Some(50.0));
        assert_eq!(out.line_items[0].product_code.as_deref(), Some("C-1"));
        assert_eq!(out.line_items[1].description, "Legacy shape");
    }

    #[test]
    fn test_map_handwriting_and_layout() {
        let out = map_analyze_result(&sample_result());
        assert_eq!(out.handwritten_notes.len(), 1);
        assert_eq!(out.handwritten_notes[0].text, "Paid by check");
        assert_eq!(out.handwritten_notes[0].confidence, 90.0);

        assert_eq!(out.layout.len(), 2);
        assert_eq!(out.layout[1].text, "Invoice INV-42");
        assert_eq!(out.layout[1].bounding_box.len(), 8);
    }

    #[test]
    fn test_map_confidence() {
        let out = map_analyze_result(&sample_result());
        let reported = &out.reported_confidence;
        assert_eq!(reported.vendor_info, Some(95.0));
        assert_eq!(reported.invoice_details, Some(92.0));
        assert_eq!(reported.line_items, Some(80.0));
        assert_eq!(reported.totals, Some(88.0));
        assert_eq!(reported.field_specific.get("invoiceNumber"), Some(&93.0));
    }

    #[test]
    fn test_map_empty_result() {
        let out = map_analyze_result(&json!({"content": ""}));
        assert!(out.vendor_name.is_none());
        assert!(out.line_items.is_empty());
        assert!(out.currency.is_none());
    }

    #[test]
    fn test_analyze_url() {
        let provider = AzureDocumentIntelligenceProvider::new()
            .with_endpoint("https://res.cognitiveservices.azure.com/")
            .with_api_key("k");
        assert_eq!(
            provider.analyze_url("https://res.cognitiveservices.azure.com/"),
            "https://res.cognitiveservices.azure.com/documentintelligence/documentModels/prebuilt-invoice:analyze?api-version=2024-11-30&stringIndexType=unicodeCodePoint"
        );
        assert!(provider.is_available());
    }

    #[test]
    fn test_handwriting_spans_count_code_points() {
        // "Reçu " is 5 code points but 6 UTF-8 bytes; the emoji is 2 UTF-16 units
        let result = json!({
            "content": "Reçu 🧾 payé comptant",
            "styles": [{
                "isHandwritten": true,
                "confidence": 0.9,
                "spans": [{"offset": 7, "length": 13}]
            }]
        });
        let notes = handwritten_notes(&result, "Reçu 🧾 payé comptant");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].text, "payé comptant");
        assert_eq!(notes[0].confidence, 90.0);
    }
}
