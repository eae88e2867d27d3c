//! Data models for uploaded documents and their extractions.

mod document;
mod extraction;

pub use document::{Document, DocumentStatus, StatusTransitionError};
pub use extraction::{
    ConfidenceScores, Extraction, ExtractionPatch, HandwrittenNote, LayoutRegion, LineItem,
    ProcessingMetadata,
};
