//! Uploaded document model and its processing lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ProcessingMetadata;
use crate::ocr::OcrProviderKind;

/// Processing status of a document.
///
/// Documents move `uploaded -> processing -> completed | error`. A completed
/// or failed document may re-enter `processing` when the user reprocesses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Completed,
    Error,
}

/// Rejected status change.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot move document from {from} to {to}")]
pub struct StatusTransitionError {
    pub from: DocumentStatus,
    pub to: DocumentStatus,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        Self::Uploaded,
        Self::Processing,
        Self::Completed,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(Self::Uploaded),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether a document in this status may move to `next`.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Uploaded, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Error)
                | (Self::Completed, Self::Processing)
                | (Self::Error, Self::Processing)
        )
    }

    /// Extraction review (download, edit, export) is only valid once completed.
    pub fn allows_review(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An uploaded invoice or receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Storage-assigned id (0 until created).
    pub id: i64,
    pub original_filename: String,
    pub file_size: u64,
    pub mime_type: String,
    /// Path of the stored file, relative to the documents directory.
    pub storage_path: String,
    /// SHA-256 hash of the file content.
    pub content_hash: String,
    pub status: DocumentStatus,
    /// User-facing message when status is `error`.
    pub error_message: Option<String>,
    /// Provider requested for this document, if any.
    pub ocr_provider: Option<OcrProviderKind>,
    pub processing_metadata: Option<ProcessingMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a freshly uploaded document.
    pub fn new(
        original_filename: String,
        file_size: u64,
        mime_type: String,
        storage_path: String,
        content_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            original_filename,
            file_size,
            mime_type,
            storage_path,
            content_hash,
            status: DocumentStatus::Uploaded,
            error_message: None,
            ocr_provider: None,
            processing_metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting transitions outside the lifecycle.
    ///
    /// Entering `processing` clears any previous error message.
    pub fn transition_to(&mut self, next: DocumentStatus) -> Result<(), StatusTransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(StatusTransitionError {
                from: self.status,
                to: next,
            });
        }
        if next == DocumentStatus::Processing {
            self.error_message = None;
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the document failed with a user-facing message.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), StatusTransitionError> {
        self.transition_to(DocumentStatus::Error)?;
        self.error_message = Some(message.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        Document::new(
            "invoice.pdf".to_string(),
            42,
            "application/pdf".to_string(),
            "ab/invoice-abcdef12.pdf".to_string(),
            "abcdef1234".to_string(),
        )
    }

    #[test]
    fn test_status_roundtrip_strings() {
        for status in DocumentStatus::ALL {
            assert_eq!(DocumentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::from_str("pending"), None);
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut d = doc();
        assert_eq!(d.status, DocumentStatus::Uploaded);
        d.transition_to(DocumentStatus::Processing).unwrap();
        d.transition_to(DocumentStatus::Completed).unwrap();
        assert!(d.status.allows_review());
    }

    #[test]
    fn test_unreachable_transitions_rejected() {
        let mut d = doc();
        assert!(d.transition_to(DocumentStatus::Completed).is_err());
        assert!(d.transition_to(DocumentStatus::Error).is_err());
        assert!(d.transition_to(DocumentStatus::Uploaded).is_err());

        d.transition_to(DocumentStatus::Processing).unwrap();
        let err = d.transition_to(DocumentStatus::Processing).unwrap_err();
        assert_eq!(err.from, DocumentStatus::Processing);
        assert!(d.transition_to(DocumentStatus::Uploaded).is_err());

        d.transition_to(DocumentStatus::Completed).unwrap();
        assert!(d.transition_to(DocumentStatus::Error).is_err());
    }

    #[test]
    fn test_retry_clears_error_message() {
        let mut d = doc();
        d.transition_to(DocumentStatus::Processing).unwrap();
        d.fail("The OCR service timed out").unwrap();
        assert_eq!(d.status, DocumentStatus::Error);
        assert!(d.error_message.is_some());
        assert!(!d.status.allows_review());

        d.transition_to(DocumentStatus::Processing).unwrap();
        assert!(d.error_message.is_none());
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(doc()).unwrap();
        assert_eq!(json["originalFilename"], "invoice.pdf");
        assert_eq!(json["fileSize"], 42);
        assert_eq!(json["status"], "uploaded");
    }
}
