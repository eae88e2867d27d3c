//! Normalization of vendor output into a common invoice shape.
//!
//! Vendors disagree on key names (`vendorName`, `vendor_name`, `company_name`),
//! nesting and value types (numbers, currency strings, Azure currency objects).
//! Keys are compared after lowercasing and dropping non-alphanumerics, so one
//! alias covers camelCase, snake_case and kebab-case spellings.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value};

use crate::models::{HandwrittenNote, LayoutRegion, LineItem};

use super::confidence::to_percent;

/// Placeholder for required text fields the vendor could not read.
pub const UNKNOWN: &str = "Unknown";

/// Confidence reported by the vendor, per category (0-100 once normalized).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportedConfidence {
    pub vendor_info: Option<f64>,
    pub invoice_details: Option<f64>,
    pub line_items: Option<f64>,
    pub totals: Option<f64>,
    pub handwritten_notes: Option<f64>,
    pub field_specific: BTreeMap<String, f64>,
}

/// Vendor-neutral invoice fields, before ids and exports are attached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedInvoice {
    pub vendor_name: Option<String>,
    pub vendor_address: Option<String>,
    pub vendor_contact: Option<String>,
    pub customer_name: Option<String>,
    pub customer_address: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub due_date: Option<String>,
    pub currency: Option<String>,
    pub subtotal: Option<f64>,
    pub tax_amount: Option<f64>,
    pub discount: Option<f64>,
    pub total_amount: Option<f64>,
    pub line_items: Vec<LineItem>,
    pub handwritten_notes: Vec<HandwrittenNote>,
    pub layout: Vec<LayoutRegion>,
    pub additional_info: BTreeMap<String, String>,
    pub document_type: Option<String>,
    pub reported_confidence: ReportedConfidence,
}

impl ExtractedInvoice {
    /// Fill required fields the vendor left empty.
    pub fn apply_required_defaults(&mut self) {
        if self.vendor_name.is_none() {
            self.vendor_name = Some(UNKNOWN.to_string());
        }
        if self.invoice_number.is_none() {
            self.invoice_number = Some(UNKNOWN.to_string());
        }
        if self.total_amount.is_none() {
            self.total_amount = Some(0.0);
        }
    }
}

const VENDOR_NAME: &[&str] = &[
    "vendorName",
    "companyName",
    "merchantName",
    "sellerName",
    "supplierName",
    "vendor",
    "merchant",
    "seller",
    "supplier",
    "company",
];
const VENDOR_ADDRESS: &[&str] = &[
    "vendorAddress",
    "merchantAddress",
    "sellerAddress",
    "supplierAddress",
    "address",
];
const VENDOR_CONTACT: &[&str] = &[
    "vendorContact",
    "vendorPhone",
    "vendorEmail",
    "contact",
    "phone",
    "email",
];
const CUSTOMER_NAME: &[&str] = &["customerName", "billTo", "buyerName", "customer", "buyer"];
const CUSTOMER_ADDRESS: &[&str] = &["customerAddress", "billToAddress", "buyerAddress"];
const INVOICE_NUMBER: &[&str] = &[
    "invoiceNumber",
    "invoiceId",
    "invoiceNo",
    "receiptNumber",
    "invoiceNumbersOrPoNumbers",
    "poNumber",
    "number",
];
const INVOICE_DATE: &[&str] = &["invoiceDate", "issueDate", "receiptDate", "date"];
const DUE_DATE: &[&str] = &["dueDate", "paymentDue", "paymentDueDate"];
const CURRENCY: &[&str] = &["currency", "currencyCode"];
const SUBTOTAL: &[&str] = &["subtotal", "netAmount"];
const TAX: &[&str] = &["taxAmount", "totalTax", "tax", "vat", "salesTax"];
const DISCOUNT: &[&str] = &["discount", "discountAmount", "totalDiscount"];
const TOTAL: &[&str] = &[
    "totalAmount",
    "invoiceTotal",
    "grandTotal",
    "amountDue",
    "total",
];
const LINE_ITEMS: &[&str] = &["lineItems", "items", "products", "lines"];
const HANDWRITTEN: &[&str] = &["handwrittenNotes", "handwriting", "handwrittenText"];
const CONFIDENCE: &[&str] = &["confidenceScores", "confidence"];
const DOCUMENT_TYPE: &[&str] = &["documentType", "documentClassification", "docType"];
const ADDITIONAL: &[&str] = &["additionalInfo", "additionalInformation", "other"];

const ITEM_DESCRIPTION: &[&str] = &["description", "name", "item", "product", "itemName"];
const ITEM_QUANTITY: &[&str] = &["quantity", "qty", "units"];
const ITEM_UNIT_PRICE: &[&str] = &["unitPrice", "price", "rate", "unitCost"];
const ITEM_AMOUNT: &[&str] = &["amount", "lineTotal", "total", "totalPrice"];
const ITEM_CODE: &[&str] = &["productCode", "sku", "code", "itemCode"];

/// Default confidence for a handwritten note the vendor did not score.
const DEFAULT_NOTE_CONFIDENCE: f64 = 70.0;

/// Normalize a key for alias comparison.
fn key_form(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// First non-null value under any alias, in alias order.
pub fn pick<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        let wanted = key_form(alias);
        obj.iter()
            .find(|(k, v)| key_form(k) == wanted && !v.is_null())
            .map(|(_, v)| v)
    })
}

fn pick_text(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    pick(obj, aliases).and_then(coerce_text)
}

fn pick_number(obj: &Map<String, Value>, aliases: &[&str]) -> Option<f64> {
    pick(obj, aliases).and_then(coerce_number)
}

fn pick_date(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    pick_text(obj, aliases).map(|s| normalize_date(&s))
}

fn is_placeholder(s: &str) -> bool {
    matches!(
        s.to_ascii_lowercase().as_str(),
        "" | "null" | "none" | "n/a" | "na" | "unknown" | "-"
    )
}

/// Coerce a JSON value into display text.
///
/// Arrays of scalars are joined with ", "; objects yield their
/// `content`/`value`/`text`/`name` member. Placeholders become `None`.
pub fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!is_placeholder(s)).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(_) | Value::Null => None,
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(coerce_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Object(obj) => pick(obj, &["content", "value", "text", "name"]).and_then(coerce_text),
    }
}

static NON_NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9.,\-]").unwrap());

/// Coerce a JSON value into a number.
///
/// Accepts plain numbers, currency strings (`"$1,234.50"`, `"1.234,50 EUR"`,
/// `"(12.00)"` as negative) and objects carrying an `amount` or `value`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_amount(s),
        Value::Object(obj) => pick(obj, &["amount", "value", "valueNumber"]).and_then(coerce_number),
        _ => None,
    }
}

/// Parse a human-formatted amount.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let negative = raw.starts_with('(') && raw.ends_with(')');
    let cleaned = NON_NUMERIC.replace_all(raw, "");
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ',');
    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    let canonical = match (last_dot, last_comma) {
        // "1.234,56": comma is the decimal separator
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        // "12,50": a single comma followed by exactly two digits is decimal
        (None, Some(comma))
            if cleaned.matches(',').count() == 1 && cleaned.len() - comma - 1 == 2 =>
        {
            cleaned.replace(',', ".")
        }
        (None, Some(_)) => cleaned.replace(',', ""),
        _ => cleaned.to_string(),
    };

    let value: f64 = canonical.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value.abs() } else { value })
}

/// Normalize a date to `YYYY-MM-DD` when it can be parsed; otherwise keep it.
pub fn normalize_date(raw: &str) -> String {
    const FORMATS: &[&str] = &[
        "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%m/%d/%y", "%d.%m.%Y", "%B %d, %Y", "%b %d, %Y",
        "%d %B %Y", "%d %b %Y", "%B %d %Y", "%b %d %Y",
    ];

    let trimmed = raw.trim();
    // Timestamps like "2024-03-01T00:00:00Z"
    let date_part = match trimmed.split_once('T') {
        Some((date, _)) if date.len() == 10 => date,
        _ => trimmed,
    };

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());

/// Find a JSON object in model output.
///
/// Tries the whole text, then fenced ```json blocks, then the outermost braces.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    for caps in JSON_FENCE.captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(v @ Value::Object(_)) = serde_json::from_str::<Value>(body.as_str().trim()) {
                return Some(v);
            }
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(v @ Value::Object(_)) => Some(v),
        _ => None,
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn line_item_from(value: &Value) -> Option<LineItem> {
    let obj = match value {
        Value::Object(obj) => obj,
        Value::String(s) if !is_placeholder(s.trim()) => {
            return Some(LineItem {
                description: s.trim().to_string(),
                ..Default::default()
            })
        }
        _ => return None,
    };

    let description = pick_text(obj, ITEM_DESCRIPTION).unwrap_or_default();
    let quantity = pick_number(obj, ITEM_QUANTITY);
    let unit_price = pick_number(obj, ITEM_UNIT_PRICE);
    let amount = pick_number(obj, ITEM_AMOUNT).or_else(|| match (quantity, unit_price) {
        (Some(q), Some(p)) => Some(round_cents(q * p)),
        _ => None,
    });

    if description.is_empty() && amount.is_none() {
        return None;
    }

    Some(LineItem {
        description,
        quantity,
        unit_price,
        amount,
        product_code: pick_text(obj, ITEM_CODE),
    })
}

fn note_from(value: &Value) -> Option<HandwrittenNote> {
    match value {
        Value::String(s) if !is_placeholder(s.trim()) => Some(HandwrittenNote {
            text: s.trim().to_string(),
            confidence: DEFAULT_NOTE_CONFIDENCE,
        }),
        Value::Object(obj) => {
            let text = pick_text(obj, &["text", "note", "content", "value"])?;
            let confidence = pick_number(obj, &["confidence", "score"])
                .map(to_percent)
                .unwrap_or(DEFAULT_NOTE_CONFIDENCE);
            Some(HandwrittenNote { text, confidence })
        }
        _ => None,
    }
}

fn reported_confidence(value: &Value) -> ReportedConfidence {
    let mut reported = ReportedConfidence::default();
    if let Value::Object(obj) = value {
        reported.vendor_info = pick_number(obj, &["vendorInfo", "vendor"]).map(to_percent);
        reported.invoice_details =
            pick_number(obj, &["invoiceDetails", "invoice"]).map(to_percent);
        reported.line_items = pick_number(obj, &["lineItems", "items"]).map(to_percent);
        reported.totals = pick_number(obj, &["totals", "total"]).map(to_percent);
        reported.handwritten_notes =
            pick_number(obj, &["handwrittenNotes", "handwriting"]).map(to_percent);
        if let Some(Value::Object(fields)) = pick(obj, &["fieldSpecific", "fields"]) {
            for (key, v) in fields {
                if let Some(n) = coerce_number(v) {
                    reported.field_specific.insert(key.clone(), to_percent(n));
                }
            }
        }
    }
    reported
}

fn string_map(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(obj) => obj
            .iter()
            .filter_map(|(k, v)| coerce_text(v).map(|s| (k.clone(), s)))
            .collect(),
        other => coerce_text(other)
            .map(|s| BTreeMap::from([("other".to_string(), s)]))
            .unwrap_or_default(),
    }
}

/// Map LLM-produced invoice JSON into the common shape.
///
/// Accepts flat objects as well as nested `vendor`/`customer`/`totals`
/// objects and wrapper objects such as `{"invoice": {...}}`.
pub fn from_llm_json(value: &Value) -> ExtractedInvoice {
    let mut out = ExtractedInvoice::default();
    let Some(root) = value.as_object() else {
        return out;
    };

    // Unwrap {"invoice": {...}} / {"data": {...}} / {"result": {...}}
    let obj = match pick(root, &["invoice", "receipt", "data", "result"]) {
        Some(Value::Object(inner)) if pick(root, VENDOR_NAME).is_none() => inner,
        _ => root,
    };

    match pick(obj, &["vendor", "seller", "merchant", "supplier"]) {
        Some(Value::Object(vendor)) => {
            out.vendor_name = pick_text(vendor, &["name", "vendorName", "companyName"]);
            out.vendor_address = pick_text(vendor, &["address"]);
            out.vendor_contact = pick_text(vendor, &["contact", "phone", "email"]);
        }
        _ => {
            out.vendor_name = pick_text(obj, VENDOR_NAME);
            out.vendor_address = pick_text(obj, VENDOR_ADDRESS);
            out.vendor_contact = pick_text(obj, VENDOR_CONTACT);
        }
    }

    match pick(obj, &["customer", "buyer", "billTo"]) {
        Some(Value::Object(customer)) => {
            out.customer_name = pick_text(customer, &["name", "customerName"]);
            out.customer_address = pick_text(customer, &["address"]);
        }
        _ => {
            out.customer_name = pick_text(obj, CUSTOMER_NAME);
            out.customer_address = pick_text(obj, CUSTOMER_ADDRESS);
        }
    }

    out.invoice_number = pick_text(obj, INVOICE_NUMBER);
    out.invoice_date = pick_date(obj, INVOICE_DATE);
    out.due_date = pick_date(obj, DUE_DATE);
    out.currency = pick_text(obj, CURRENCY).map(|c| c.to_uppercase());

    let totals = match pick(obj, &["totals"]) {
        Some(Value::Object(totals)) => totals,
        _ => obj,
    };
    out.subtotal = pick_number(totals, SUBTOTAL);
    out.tax_amount = pick_number(totals, TAX);
    out.discount = pick_number(totals, DISCOUNT);
    out.total_amount = pick_number(totals, TOTAL);

    if let Some(Value::Array(items)) = pick(obj, LINE_ITEMS) {
        out.line_items = items.iter().filter_map(line_item_from).collect();
    }
    match pick(obj, HANDWRITTEN) {
        Some(Value::Array(notes)) => {
            out.handwritten_notes = notes.iter().filter_map(note_from).collect();
        }
        Some(single) => out.handwritten_notes = note_from(single).into_iter().collect(),
        None => {}
    }
    if let Some(conf) = pick(obj, CONFIDENCE) {
        out.reported_confidence = reported_confidence(conf);
    }
    out.document_type = pick_text(obj, DOCUMENT_TYPE);
    if let Some(info) = pick(obj, ADDITIONAL) {
        out.additional_info = string_map(info);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_amount_formats() {
        assert_eq!(parse_amount("$1,234.50"), Some(1234.5));
        assert_eq!(parse_amount("1.234,50 EUR"), Some(1234.5));
        assert_eq!(parse_amount("12,50"), Some(12.5));
        assert_eq!(parse_amount("1,234"), Some(1234.0));
        assert_eq!(parse_amount("(12.00)"), Some(-12.0));
        assert_eq!(parse_amount("USD"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_coerce_number_from_currency_object() {
        let v = json!({"amount": 99.95, "currencyCode": "USD"});
        assert_eq!(coerce_number(&v), Some(99.95));
    }

    #[test]
    fn test_coerce_text() {
        assert_eq!(coerce_text(&json!("  Acme ")), Some("Acme".to_string()));
        assert_eq!(coerce_text(&json!("N/A")), None);
        assert_eq!(coerce_text(&json!(["PO-1", "INV-2"])), Some("PO-1, INV-2".to_string()));
        assert_eq!(coerce_text(&json!({"content": "x"})), Some("x".to_string()));
        assert_eq!(coerce_text(&json!(42)), Some("42".to_string()));
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date("2024-03-01"), "2024-03-01");
        assert_eq!(normalize_date("03/01/2024"), "2024-03-01");
        assert_eq!(normalize_date("March 1, 2024"), "2024-03-01");
        assert_eq!(normalize_date("1 Mar 2024"), "2024-03-01");
        assert_eq!(normalize_date("2024-03-01T10:00:00Z"), "2024-03-01");
        assert_eq!(normalize_date("sometime in spring"), "sometime in spring");
    }

    #[test]
    fn test_extract_json_variants() {
        let bare = r#"{"vendorName":"Acme"}"#;
        assert_eq!(extract_json(bare).unwrap()["vendorName"], "Acme");

        let fenced = "Here you go:\n```json\n{\"vendorName\": \"Acme\"}\n```\nThanks";
        assert_eq!(extract_json(fenced).unwrap()["vendorName"], "Acme");

        let prose = "The result is {\"total\": 5} as requested.";
        assert_eq!(extract_json(prose).unwrap()["total"], 5);

        assert!(extract_json("no json here").is_none());
        assert!(extract_json("[1,2,3]").is_none());
    }

    #[test]
    fn test_from_llm_json_camel_case() {
        let v = json!({
            "vendorName": "Acme Supplies",
            "vendorAddress": "1 Main St",
            "invoiceNumber": "INV-001",
            "invoiceDate": "01/15/2024",
            "currency": "usd",
            "subtotal": "100.00",
            "taxAmount": 8.5,
            "totalAmount": "$108.50",
            "lineItems": [
                {"description": "Widget", "quantity": 2, "unitPrice": 50, "amount": 100},
                {"description": "", "quantity": 1}
            ],
            "handwrittenNotes": [{"text": "Paid 1/20", "confidence": 0.8}, "Call Bob"],
            "confidenceScores": {"overall": 92, "vendorInfo": 0.95}
        });

        let out = from_llm_json(&v);
        assert_eq!(out.vendor_name.as_deref(), Some("Acme Supplies"));
        assert_eq!(out.invoice_date.as_deref(), Some("2024-01-15"));
        assert_eq!(out.currency.as_deref(), Some("USD"));
        assert_eq!(out.subtotal, Some(100.0));
        assert_eq!(out.total_amount, Some(108.5));
        assert_eq!(out.line_items.len(), 1);
        assert_eq!(out.handwritten_notes.len(), 2);
        assert_eq!(out.handwritten_notes[0].confidence, 80.0);
        assert_eq!(out.handwritten_notes[1].confidence, DEFAULT_NOTE_CONFIDENCE);
        assert_eq!(out.reported_confidence.vendor_info, Some(95.0));
    }

    #[test]
    fn test_from_llm_json_structuring_schema() {
        let v = json!({
            "company_name": "Corner Store",
            "address": "5 Elm Rd",
            "date": "2024-02-02",
            "invoice_numbers_or_po_numbers": ["R-77", "PO-9"],
            "items": [{"name": "Milk", "quantity": 2, "price": 1.25}],
            "total_amount": 2.5,
            "other": {"cashier": "Dana"}
        });

        let out = from_llm_json(&v);
        assert_eq!(out.vendor_name.as_deref(), Some("Corner Store"));
        assert_eq!(out.vendor_address.as_deref(), Some("5 Elm Rd"));
        assert_eq!(out.invoice_number.as_deref(), Some("R-77, PO-9"));
        assert_eq!(out.line_items[0].description, "Milk");
        assert_eq!(out.line_items[0].amount, Some(2.5));
        assert_eq!(out.additional_info.get("cashier").map(String::as_str), Some("Dana"));
    }

    #[test]
    fn test_from_llm_json_nested_objects() {
        let v = json!({
            "invoice": {
                "vendor": {"name": "Nested Co", "address": "9 Side St"},
                "customer": {"name": "Buyer Inc"},
                "totals": {"subtotal": 10, "tax": 1, "total": 11}
            }
        });

        let out = from_llm_json(&v);
        assert_eq!(out.vendor_name.as_deref(), Some("Nested Co"));
        assert_eq!(out.customer_name.as_deref(), Some("Buyer Inc"));
        assert_eq!(out.tax_amount, Some(1.0));
        assert_eq!(out.total_amount, Some(11.0));
    }

    #[test]
    fn test_required_defaults() {
        let mut out = from_llm_json(&json!({}));
        out.apply_required_defaults();
        assert_eq!(out.vendor_name.as_deref(), Some(UNKNOWN));
        assert_eq!(out.invoice_number.as_deref(), Some(UNKNOWN));
        assert_eq!(out.total_amount, Some(0.0));
    }
}
