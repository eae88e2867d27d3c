//! Service layer for upload handling and OCR processing.
//!
//! Used by both the HTTP server and the CLI.

pub mod processing;
pub mod upload;

pub use processing::{friendly_error, ProcessingError, Processor};
pub use upload::{check_batch_size, validate_upload, UploadError, UploadLimits};
