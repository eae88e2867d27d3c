//! Structured OCR extraction results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single invoice line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_code: Option<String>,
}

/// Handwritten annotation found on the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandwrittenNote {
    pub text: String,
    /// 0-100.
    pub confidence: f64,
}

/// Per-category confidence, each on a 0-100 scale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceScores {
    pub overall: f64,
    pub vendor_info: f64,
    pub invoice_details: f64,
    pub line_items: f64,
    pub totals: f64,
    pub handwritten_notes: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub field_specific: BTreeMap<String, f64>,
}

/// A positioned piece of text on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutRegion {
    pub page: u32,
    pub text: String,
    /// Polygon as a flat list of x,y pairs in page units.
    pub bounding_box: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// How and when an extraction was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetadata {
    pub ocr_engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub processing_time_ms: u64,
    pub processed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_classification: Option<String>,
}

/// Structured result derived from a document. At most one per document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub id: i64,
    pub document_id: i64,
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
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub handwritten_notes: Vec<HandwrittenNote>,
    #[serde(default)]
    pub confidence_scores: ConfidenceScores,
    #[serde(default)]
    pub layout_data: Vec<LayoutRegion>,
    #[serde(default)]
    pub additional_info: BTreeMap<String, String>,
    pub processing_metadata: Option<ProcessingMetadata>,
    /// Cached Markdown export.
    pub markdown_output: Option<String>,
    /// Cached JSON export.
    pub json_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Extraction {
    /// Empty extraction for a document.
    pub fn new(document_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            document_id,
            vendor_name: None,
            vendor_address: None,
            vendor_contact: None,
            customer_name: None,
            customer_address: None,
            invoice_number: None,
            invoice_date: None,
            due_date: None,
            currency: None,
            subtotal: None,
            tax_amount: None,
            discount: None,
            total_amount: None,
            line_items: Vec::new(),
            handwritten_notes: Vec::new(),
            confidence_scores: ConfidenceScores::default(),
            layout_data: Vec::new(),
            additional_info: BTreeMap::new(),
            processing_metadata: None,
            markdown_output: None,
            json_output: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a user edit. Returns true if anything changed.
    ///
    /// Empty strings clear text fields. Cached exports are not touched here;
    /// callers re-render them after a change.
    pub fn apply_patch(&mut self, patch: ExtractionPatch) -> bool {
        let before = self.clone();

        patch_text(&mut self.vendor_name, patch.vendor_name);
        patch_text(&mut self.vendor_address, patch.vendor_address);
        patch_text(&mut self.vendor_contact, patch.vendor_contact);
        patch_text(&mut self.customer_name, patch.customer_name);
        patch_text(&mut self.customer_address, patch.customer_address);
        patch_text(&mut self.invoice_number, patch.invoice_number);
        patch_text(&mut self.invoice_date, patch.invoice_date);
        patch_text(&mut self.due_date, patch.due_date);
        patch_text(&mut self.currency, patch.currency);

        if let Some(v) = patch.subtotal {
            self.subtotal = Some(v);
        }
        if let Some(v) = patch.tax_amount {
            self.tax_amount = Some(v);
        }
        if let Some(v) = patch.discount {
            self.discount = Some(v);
        }
        if let Some(v) = patch.total_amount {
            self.total_amount = Some(v);
        }
        if let Some(items) = patch.line_items {
            self.line_items = items;
        }
        if let Some(notes) = patch.handwritten_notes {
            self.handwritten_notes = notes;
        }
        if let Some(info) = patch.additional_info {
            self.additional_info = info;
        }

        let changed = *self != before;
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

fn patch_text(field: &mut Option<String>, value: Option<String>) {
    if let Some(v) = value {
        let v = v.trim();
        *field = if v.is_empty() {
            None
        } else {
            Some(v.to_string())
        };
    }
}

/// Partial update sent by the review editor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionPatch {
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
    pub line_items: Option<Vec<LineItem>>,
    pub handwritten_notes: Option<Vec<HandwrittenNote>>,
    pub additional_info: Option<BTreeMap<String, String>>,
}
