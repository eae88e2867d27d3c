//! Upload validation.
//!
//! Every check here runs before anything is written to disk or storage.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// MIME types accepted for upload.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/tiff",
    "image/gif",
    "image/webp",
];

/// Default per-file size limit (10 MB).
pub const DEFAULT_MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Default number of files per upload request.
pub const DEFAULT_MAX_FILES: usize = 10;

/// How far into a file the `%PDF-` header may appear.
const PDF_HEADER_WINDOW: usize = 1024;

/// Upload size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadLimits {
    pub max_file_bytes: usize,
    pub max_files: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

/// Reasons an upload is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("No files were uploaded")]
    NoFiles,

    #[error("Too many files: {count} (maximum {max} per upload)")]
    TooManyFiles { count: usize, max: usize },

    #[error("{filename} is empty")]
    EmptyFile { filename: String },

    #[error("{filename} is too large ({size} bytes, maximum {max} bytes)")]
    TooLarge {
        filename: String,
        size: usize,
        max: usize,
    },

    #[error("{filename} has unsupported type {mime_type}. Allowed types: PDF, JPEG, PNG, TIFF, GIF, WEBP")]
    UnsupportedType { filename: String, mime_type: String },

    #[error("{filename} is not a valid PDF (missing %PDF signature)")]
    InvalidPdf { filename: String },

    #[error("{filename} content does not match its declared type {declared} (looks like {detected})")]
    ContentMismatch {
        filename: String,
        declared: String,
        detected: String,
    },
}

/// Reject batches that are empty or exceed the file count limit.
pub fn check_batch_size(count: usize, limits: &UploadLimits) -> Result<(), UploadError> {
    if count == 0 {
        return Err(UploadError::NoFiles);
    }
    if count > limits.max_files {
        return Err(UploadError::TooManyFiles {
            count,
            max: limits.max_files,
        });
    }
    Ok(())
}

/// Canonical form of a declared content type.
fn canonical_mime(declared: &str) -> String {
    let essence = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        "image/x-png" => "image/png".to_string(),
        "image/tif" | "image/x-tiff" => "image/tiff".to_string(),
        _ => essence,
    }
}

/// MIME type detected from magic bytes.
fn sniff(bytes: &[u8]) -> Option<&'static str> {
    infer::get(bytes).map(|t| t.mime_type())
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

/// Validate one uploaded file and return its resolved MIME type.
///
/// A missing or generic (`application/octet-stream`) declared type is
/// resolved from content, then from the filename extension.
pub fn validate_upload(
    filename: &str,
    declared_mime: Option<&str>,
    bytes: &[u8],
    limits: &UploadLimits,
) -> Result<String, UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::EmptyFile {
            filename: filename.to_string(),
        });
    }
    if bytes.len() > limits.max_file_bytes {
        return Err(UploadError::TooLarge {
            filename: filename.to_string(),
            size: bytes.len(),
            max: limits.max_file_bytes,
        });
    }

    let declared = declared_mime
        .map(canonical_mime)
        .filter(|m| !m.is_empty() && m != "application/octet-stream");
    let mime_type = match declared {
        Some(m) => m,
        None => sniff(bytes)
            .map(str::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(filename)
                    .first_or_octet_stream()
                    .essence_str()
                    .to_string()
            }),
    };

    if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(UploadError::UnsupportedType {
            filename: filename.to_string(),
            mime_type,
        });
    }

    if mime_type == "application/pdf" {
        if !has_pdf_header(bytes) {
            return Err(UploadError::InvalidPdf {
                filename: filename.to_string(),
            });
        }
        return Ok(mime_type);
    }

    match sniff(bytes) {
        Some(detected) if detected == mime_type => Ok(mime_type),
        detected => Err(UploadError::ContentMismatch {
            filename: filename.to_string(),
            declared: mime_type,
            detected: detected.unwrap_or("unknown").to_string(),
        }),
    }
}
