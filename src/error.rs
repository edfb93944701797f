//! Error types for the two-stage OCR pipeline.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot produce any usable result
//!   (bad input, unreadable PDF, entity extraction unavailable on every
//!   tier). Returned as `Err(PipelineError)` from [`crate::Pipeline::run`].
//!
//! * [`ItemError`] — **Non-fatal**: one page, entity, or compiled slot
//!   failed but the rest of the run is fine. Collected into
//!   [`crate::output::PipelineReport::diagnostics`] instead of being
//!   propagated.
//!
//! Stage-2 failures (compile or enhance) are neither: they downgrade the
//! report to "stage 1 only" and surface as a message in
//! [`crate::output::Stage2Report`].

use crate::ocr::OcrTier;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, used in logs, progress events and fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Rasterize,
    Extract,
    Crop,
    Compile,
    Enhance,
    Map,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Rasterize => "rasterize",
            Stage::Extract => "extract",
            Stage::Crop => "crop",
            Stage::Compile => "compile",
            Stage::Enhance => "enhance",
            Stage::Map => "map",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All fatal errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request payload could not be decoded.
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The payload decoded, but it is not a PDF.
    #[error("Input is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// pdfium could not parse the document.
    #[error("PDF is corrupt: {detail}")]
    CorruptPdf { detail: String },

    /// Not a single page could be rasterised.
    #[error("Rasterisation failed for every page: {detail}")]
    RasterisationFailed { detail: String },

    // ── OCR service errors ────────────────────────────────────────────────
    /// The OCR service failed on every tier that was tried.
    #[error("OCR service unavailable during {stage} (tried {tried_tiers:?}): {detail}")]
    ServiceUnavailable {
        stage: Stage,
        tried_tiers: Vec<OcrTier>,
        detail: String,
    },

    // ── Control flow ──────────────────────────────────────────────────────
    /// The run was cancelled before any usable result existed.
    #[error("Pipeline cancelled during {stage}")]
    Cancelled { stage: Stage },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the report file.
    #[error("Failed to write report file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library next to the\n\
binary, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page, entity or compiled slot.
///
/// These never abort the run; they are attached to the report so callers
/// can tell how complete the result is.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ItemError {
    /// A source page could not be rasterised and was omitted.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The entity's bounding polygon collapses to an empty rectangle.
    #[error("Entity {original_index}: invalid geometry: {detail}")]
    #[serde(rename_all = "camelCase")]
    InvalidGeometry {
        original_index: usize,
        detail: String,
    },

    /// The entity references a page that was not rasterised.
    #[error("Entity {original_index}: page {page} is not available")]
    #[serde(rename_all = "camelCase")]
    PageUnavailable { original_index: usize, page: usize },

    /// The cropped pixels could not be encoded.
    #[error("Entity {original_index}: crop encoding failed: {detail}")]
    #[serde(rename_all = "camelCase")]
    CropEncodingFailed {
        original_index: usize,
        detail: String,
    },

    /// A cropped image could not be embedded; its compiled slot is empty.
    #[error("Entity {original_index}: compiled page {page_index} slot {slot} left empty: {detail}")]
    #[serde(rename_all = "camelCase")]
    EncodingUnsupported {
        original_index: usize,
        page_index: usize,
        slot: usize,
        detail: String,
    },

    /// Enhanced text for a page had no compiled page to map onto.
    #[error("Enhanced page {page_number}: no compiled page to map onto")]
    #[serde(rename_all = "camelCase")]
    MappingSkipped { page_number: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_unavailable_display() {
        let e = PipelineError::ServiceUnavailable {
            stage: Stage::Extract,
            tried_tiers: vec![OcrTier::Premium, OcrTier::Basic],
            detail: "HTTP 503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("extract"), "got: {msg}");
        assert!(msg.contains("HTTP 503"), "got: {msg}");
    }

    #[test]
    fn not_a_pdf_display() {
        let e = PipelineError::NotAPdf {
            magic: b"GIF8".to_vec(),
        };
        assert!(e.to_string().contains("not a valid PDF"));
    }

    #[test]
    fn item_error_serialises_with_kind_tag() {
        let e = ItemError::InvalidGeometry {
            original_index: 3,
            detail: "width 0".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "invalidGeometry");
        assert_eq!(json["originalIndex"], 3);
    }

    #[test]
    fn encoding_unsupported_display() {
        let e = ItemError::EncodingUnsupported {
            original_index: 7,
            page_index: 1,
            slot: 3,
            detail: "bad magic".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("slot 3"));
        assert!(msg.contains("Entity 7"));
    }
}
