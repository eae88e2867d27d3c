//! Export formatters for extractions.
//!
//! Pure functions: the same extraction always renders to the same bytes.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{ConfidenceScores, Extraction, HandwrittenNote, LayoutRegion, LineItem, ProcessingMetadata};

const NOT_AVAILABLE: &str = "N/A";

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "markdown" | "md" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    /// Attachment filename for an extraction export.
    pub fn filename(&self, extraction_id: i64) -> String {
        format!("extraction-{}.{}", extraction_id, self.extension())
    }
}

/// Render an extraction in the given format.
pub fn render(extraction: &Extraction, format: ExportFormat) -> Result<String, serde_json::Error> {
    Ok(match format {
        ExportFormat::Json => to_json(extraction)?,
        ExportFormat::Markdown => to_markdown(extraction),
        ExportFormat::Csv => to_csv(extraction),
    })
}

/// Exported view of an extraction. Cached render outputs are left out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtractionExport<'a> {
    id: i64,
    document_id: i64,
    vendor_name: Option<&'a str>,
    vendor_address: Option<&'a str>,
    vendor_contact: Option<&'a str>,
    customer_name: Option<&'a str>,
    customer_address: Option<&'a str>,
    invoice_number: Option<&'a str>,
    invoice_date: Option<&'a str>,
    due_date: Option<&'a str>,
    currency: Option<&'a str>,
    subtotal: Option<f64>,
    tax_amount: Option<f64>,
    discount: Option<f64>,
    total_amount: Option<f64>,
    line_items: &'a [LineItem],
    handwritten_notes: &'a [HandwrittenNote],
    confidence_scores: &'a ConfidenceScores,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    layout_data: &'a [LayoutRegion],
    additional_info: &'a BTreeMap<String, String>,
    processing_metadata: Option<&'a ProcessingMetadata>,
}

impl<'a> From<&'a Extraction> for ExtractionExport<'a> {
    fn from(e: &'a Extraction) -> Self {
        Self {
            id: e.id,
            document_id: e.document_id,
            vendor_name: e.vendor_name.as_deref(),
            vendor_address: e.vendor_address.as_deref(),
            vendor_contact: e.vendor_contact.as_deref(),
            customer_name: e.customer_name.as_deref(),
            customer_address: e.customer_address.as_deref(),
            invoice_number: e.invoice_number.as_deref(),
            invoice_date: e.invoice_date.as_deref(),
            due_date: e.due_date.as_deref(),
            currency: e.currency.as_deref(),
            subtotal: e.subtotal,
            tax_amount: e.tax_amount,
            discount: e.discount,
            total_amount: e.total_amount,
            line_items: &e.line_items,
            handwritten_notes: &e.handwritten_notes,
            confidence_scores: &e.confidence_scores,
            layout_data: &e.layout_data,
            additional_info: &e.additional_info,
            processing_metadata: e.processing_metadata.as_ref(),
        }
    }
}

/// Pretty-printed JSON export.
pub fn to_json(extraction: &Extraction) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&ExtractionExport::from(extraction))
}

fn text_or_na(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => NOT_AVAILABLE,
    }
}

fn amount_or_na(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.2}", v))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn number_or_blank(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn amount_or_blank(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Markdown cells cannot contain raw pipes or newlines.
fn md_cell(value: &str) -> String {
    value.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Human-readable Markdown report.
pub fn to_markdown(e: &Extraction) -> String {
    let mut md: Vec<String> = vec!["# Invoice Extraction Result".to_string(), String::new()];

    md.push("## Vendor Information".to_string());
    md.push(format!("- **Vendor Name**: {}", text_or_na(e.vendor_name.as_deref())));
    md.push(format!("- **Vendor Address**: {}", text_or_na(e.vendor_address.as_deref())));
    md.push(format!("- **Vendor Contact**: {}", text_or_na(e.vendor_contact.as_deref())));
    md.push(String::new());

    if e.customer_name.is_some() || e.customer_address.is_some() {
        md.push("## Customer Information".to_string());
        md.push(format!("- **Customer Name**: {}", text_or_na(e.customer_name.as_deref())));
        md.push(format!(
            "- **Customer Address**: {}",
            text_or_na(e.customer_address.as_deref())
        ));
        md.push(String::new());
    }

    md.push("## Invoice Details".to_string());
    md.push(format!("- **Invoice Number**: {}", text_or_na(e.invoice_number.as_deref())));
    md.push(format!("- **Invoice Date**: {}", text_or_na(e.invoice_date.as_deref())));
    md.push(format!("- **Due Date**: {}", text_or_na(e.due_date.as_deref())));
    md.push(format!("- **Currency**: {}", text_or_na(e.currency.as_deref())));
    md.push(String::new());

    md.push("## Line Items".to_string());
    md.push(String::new());
    if e.line_items.is_empty() {
        md.push("No line items found.".to_string());
    } else {
        md.push("| Description | Quantity | Unit Price | Amount |".to_string());
        md.push("| ----------- | -------- | ---------- | ------ |".to_string());
        for item in &e.line_items {
            md.push(format!(
                "| {} | {} | {} | {} |",
                md_cell(&item.description),
                number_or_blank(item.quantity),
                amount_or_blank(item.unit_price),
                amount_or_blank(item.amount)
            ));
        }
    }
    md.push(String::new());

    md.push("## Totals".to_string());
    md.push(format!("- **Subtotal**: {}", amount_or_na(e.subtotal)));
    md.push(format!("- **Tax**: {}", amount_or_na(e.tax_amount)));
    md.push(format!("- **Discount**: {}", amount_or_na(e.discount)));
    md.push(format!("- **Total**: {}", amount_or_na(e.total_amount)));

    if !e.handwritten_notes.is_empty() {
        md.push(String::new());
        md.push("## Handwritten Notes".to_string());
        for (i, note) in e.handwritten_notes.iter().enumerate() {
            md.push(format!("{}. {}", i + 1, note.text));
        }
    }

    if !e.additional_info.is_empty() {
        md.push(String::new());
        md.push("## Additional Information".to_string());
        for (key, value) in &e.additional_info {
            md.push(format!("- **{}**: {}", key, value));
        }
    }

    md.join("\n")
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
pub fn escape_csv(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(cells: &[&str]) -> String {
    cells
        .iter()
        .map(|c| escape_csv(c))
        .collect::<Vec<_>>()
        .join(",")
}

/// Two-section CSV: header fields, then the line item table.
pub fn to_csv(e: &Extraction) -> String {
    let mut rows = vec![csv_row(&["Field", "Value"])];

    let text_fields = [
        ("Vendor Name", e.vendor_name.as_deref()),
        ("Vendor Address", e.vendor_address.as_deref()),
        ("Vendor Contact", e.vendor_contact.as_deref()),
        ("Customer Name", e.customer_name.as_deref()),
        ("Customer Address", e.customer_address.as_deref()),
        ("Invoice Number", e.invoice_number.as_deref()),
        ("Invoice Date", e.invoice_date.as_deref()),
        ("Due Date", e.due_date.as_deref()),
        ("Currency", e.currency.as_deref()),
    ];
    for (label, value) in text_fields {
        rows.push(csv_row(&[label, value.unwrap_or_default()]));
    }

    let amounts = [
        ("Subtotal", e.subtotal),
        ("Tax", e.tax_amount),
        ("Discount", e.discount),
        ("Total", e.total_amount),
    ];
    for (label, value) in amounts {
        rows.push(csv_row(&[label, &amount_or_blank(value)]));
    }
    rows.push(csv_row(&[
        "Overall Confidence",
        &format!("{:.2}", e.confidence_scores.overall),
    ]));

    rows.push(String::new());
    rows.push(csv_row(&[
        "Description",
        "Quantity",
        "Unit Price",
        "Amount",
        "Product Code",
    ]));
    for item in &e.line_items {
        rows.push(csv_row(&[
            &item.description,
            &number_or_blank(item.quantity),
            &amount_or_blank(item.unit_price),
            &amount_or_blank(item.amount),
            item.product_code.as_deref().unwrap_or_default(),
        ]));
    }

    if !e.handwritten_notes.is_empty() {
        rows.push(String::new());
        rows.push(csv_row(&["Handwritten Note", "Confidence"]));
        for note in &e.handwritten_notes {
            rows.push(csv_row(&[&note.text, &format!("{:.2}", note.confidence)]));
        }
    }

    let mut out = rows.join("\n");
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Extraction {
        let mut e = Extraction::new(7);
        e.id = 3;
        e.vendor_name = Some("Acme, Inc.".to_string());
        e.invoice_number = Some("INV-001".to_string());
        e.invoice_date = Some("2024-03-01".to_string());
        e.subtotal = Some(100.0);
        e.tax_amount = Some(8.5);
        e.total_amount = Some(108.5);
        e.line_items = vec![LineItem {
            description: "Bolts | 10mm".to_string(),
            quantity: Some(4.0),
            unit_price: Some(25.0),
            amount: Some(100.0),
            product_code: Some("B-10".to_string()),
        }];
        e.handwritten_notes = vec![HandwrittenNote {
            text: "Paid \"cash\"".to_string(),
            confidence: 72.5,
        }];
        e.markdown_output = Some("cached".to_string());
        e
    }

    #[test]
    fn test_markdown_sections() {
        let md = to_markdown(&sample());
        assert!(md.starts_with("# Invoice Extraction Result\n"));
        assert!(md.contains("- **Vendor Name**: Acme, Inc."));
        assert!(md.contains("- **Vendor Address**: N/A"));
        assert!(md.contains("| Bolts \\| 10mm | 4 | 25.00 | 100.00 |"));
        assert!(md.contains("- **Total**: 108.50"));
        assert!(md.contains("- **Discount**: N/A"));
        assert!(md.contains("## Handwritten Notes\n1. Paid \"cash\""));
        assert!(!md.contains("Customer Information"));
    }

    #[test]
    fn test_markdown_without_line_items() {
        let md = to_markdown(&Extraction::new(1));
        assert!(md.contains("No line items found."));
        assert!(!md.contains("Handwritten Notes"));
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");

        let csv = to_csv(&sample());
        assert!(csv.starts_with("Field,Value\n"));
        assert!(csv.contains("Vendor Name,\"Acme, Inc.\"\n"));
        assert!(csv.contains("Bolts | 10mm,4,25.00,100.00,B-10\n"));
        assert!(csv.contains("\"Paid \"\"cash\"\"\",72.50\n"));
    }

    #[test]
    fn test_json_excludes_cached_outputs() {
        let json = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["vendorName"], "Acme, Inc.");
        assert_eq!(value["lineItems"][0]["productCode"], "B-10");
        assert!(value.get("markdownOutput").is_none());
        assert!(value.get("jsonOutput").is_none());
    }

    #[test]
    fn test_render_is_deterministic() {
        let e = sample();
        for format in [ExportFormat::Json, ExportFormat::Markdown, ExportFormat::Csv] {
            assert_eq!(render(&e, format).unwrap(), render(&e, format).unwrap());
        }
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(ExportFormat::from_str("md"), Some(ExportFormat::Markdown));
        assert_eq!(ExportFormat::from_str("xml"), None);
        assert_eq!(ExportFormat::Csv.extension(), "csv");
        assert_eq!(ExportFormat::Json.content_type(), "application/json");
        assert_eq!(ExportFormat::Markdown.filename(3), "extraction-3.md");
    }
}
