//! Diesel row types and conversions to domain models.

use diesel::prelude::*;

use super::parse_datetime;
use super::util::{from_json_column, to_json_column};
use crate::models::{Document, DocumentStatus, Extraction};
use crate::ocr::OcrProviderKind;
use crate::schema;

/// Document row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentRecord {
    pub id: i64,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub storage_path: String,
    pub content_hash: String,
    pub status: String,
    pub error_message: Option<String>,
    pub ocr_provider: Option<String>,
    pub processing_metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Document columns for insert and update.
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::documents)]
#[diesel(treat_none_as_null = true)]
pub struct DocumentRow<'a> {
    pub original_filename: &'a str,
    pub file_size: i64,
    pub mime_type: &'a str,
    pub storage_path: &'a str,
    pub content_hash: &'a str,
    pub status: &'a str,
    pub error_message: Option<&'a str>,
    pub ocr_provider: Option<&'a str>,
    pub processing_metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl<'a> DocumentRow<'a> {
    pub fn from_document(doc: &'a Document) -> Result<Self, serde_json::Error> {
        Ok(Self {
            original_filename: &doc.original_filename,
            file_size: doc.file_size as i64,
            mime_type: &doc.mime_type,
            storage_path: &doc.storage_path,
            content_hash: &doc.content_hash,
            status: doc.status.as_str(),
            error_message: doc.error_message.as_deref(),
            ocr_provider: doc.ocr_provider.map(|k| k.as_str()),
            processing_metadata: doc
                .processing_metadata
                .as_ref()
                .map(to_json_column)
                .transpose()?,
            created_at: doc.created_at.to_rfc3339(),
            updated_at: doc.updated_at.to_rfc3339(),
        })
    }
}

impl From<DocumentRecord> for Document {
    fn from(record: DocumentRecord) -> Self {
        Document {
            id: record.id,
            original_filename: record.original_filename,
            file_size: record.file_size.max(0) as u64,
            mime_type: record.mime_type,
            storage_path: record.storage_path,
            content_hash: record.content_hash,
            status: DocumentStatus::from_str(&record.status).unwrap_or(DocumentStatus::Error),
            error_message: record.error_message,
            ocr_provider: record.ocr_provider.as_deref().and_then(OcrProviderKind::from_str),
            processing_metadata: record
                .processing_metadata
                .and_then(|raw| serde_json::from_str(&raw).ok()),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Extraction row from the database.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::extractions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ExtractionRecord {
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
    pub line_items: String,
    pub handwritten_notes: String,
    pub confidence_scores: String,
    pub layout_data: String,
    pub additional_info: String,
    pub processing_metadata: Option<String>,
    pub markdown_output: Option<String>,
    pub json_output: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Extraction columns for insert and update.
#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::extractions)]
#[diesel(treat_none_as_null = true)]
pub struct ExtractionRow<'a> {
    pub document_id: i64,
    pub vendor_name: Option<&'a str>,
    pub vendor_address: Option<&'a str>,
    pub vendor_contact: Option<&'a str>,
    pub customer_name: Option<&'a str>,
    pub customer_address: Option<&'a str>,
    pub invoice_number: Option<&'a str>,
    pub invoice_date: Option<&'a str>,
    pub due_date: Option<&'a str>,
    pub currency: Option<&'a str>,
    pub subtotal: Option<f64>,
    pub tax_amount: Option<f64>,
    pub discount: Option<f64>,
    pub total_amount: Option<f64>,
    pub line_items: String,
    pub handwritten_notes: String,
    pub confidence_scores: String,
    pub layout_data: String,
    pub additional_info: String,
    pub processing_metadata: Option<String>,
    pub markdown_output: Option<&'a str>,
    pub json_output: Option<&'a str>,
    pub created_at: String,
    pub updated_at: String,
}

impl<'a> ExtractionRow<'a> {
    pub fn from_extraction(e: &'a Extraction) -> Result<Self, serde_json::Error> {
        Ok(Self {
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
            line_items: to_json_column(&e.line_items)?,
            handwritten_notes: to_json_column(&e.handwritten_notes)?,
            confidence_scores: to_json_column(&e.confidence_scores)?,
            layout_data: to_json_column(&e.layout_data)?,
            additional_info: to_json_column(&e.additional_info)?,
            processing_metadata: e
                .processing_metadata
                .as_ref()
                .map(to_json_column)
                .transpose()?,
            markdown_output: e.markdown_output.as_deref(),
            json_output: e.json_output.as_deref(),
            created_at: e.created_at.to_rfc3339(),
            updated_at: e.updated_at.to_rfc3339(),
        })
    }
}

impl From<ExtractionRecord> for Extraction {
    fn from(record: ExtractionRecord) -> Self {
        Extraction {
            id: record.id,
            document_id: record.document_id,
            vendor_name: record.vendor_name,
            vendor_address: record.vendor_address,
            vendor_contact: record.vendor_contact,
            customer_name: record.customer_name,
            customer_address: record.customer_address,
            invoice_number: record.invoice_number,
            invoice_date: record.invoice_date,
            due_date: record.due_date,
            currency: record.currency,
            subtotal: record.subtotal,
            tax_amount: record.tax_amount,
            discount: record.discount,
            total_amount: record.total_amount,
            line_items: from_json_column(&record.line_items),
            handwritten_notes: from_json_column(&record.handwritten_notes),
            confidence_scores: from_json_column(&record.confidence_scores),
            layout_data: from_json_column(&record.layout_data),
            additional_info: from_json_column(&record.additional_info),
            processing_metadata: record
                .processing_metadata
                .and_then(|raw| serde_json::from_str(&raw).ok()),
            markdown_output: record.markdown_output,
            json_output: record.json_output,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}
