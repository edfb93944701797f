//! The external OCR service, seen from the pipeline.
//!
//! Recognition itself is a black box behind [`OcrService`]. The service has
//! two quality tiers; the premium tier adds math/formula and selection-mark
//! recognition at a higher price. Both stage adapters talk to the service
//! through this trait, so tests can swap in an in-process fake and
//! production code uses [`documentai::DocumentAiClient`].

pub mod documentai;
pub mod fallback;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use documentai::{Credentials, DocumentAiClient, DocumentAiConfig};
pub use fallback::{run_with_downgrade, OcrOutcome};

/// Quality tier of the OCR service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrTier {
    /// Plain OCR and entity detection.
    #[default]
    Basic,
    /// Adds math/formula and selection-mark recognition.
    Premium,
}

impl OcrTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrTier::Basic => "basic",
            OcrTier::Premium => "premium",
        }
    }
}

impl fmt::Display for OcrTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request processing flags.
///
/// The downgrade retry always sends `ProcessOptions::default()` — no flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub native_pdf_parsing: bool,
    pub image_quality_scores: bool,
    pub math_ocr: bool,
    pub selection_marks: bool,
}

impl ProcessOptions {
    /// Flags for the premium enhancement pass.
    pub fn premium() -> Self {
        Self {
            native_pdf_parsing: false,
            image_quality_scores: false,
            math_ocr: true,
            selection_marks: true,
        }
    }

    /// Flags for entity extraction.
    pub fn extraction(native_pdf_parsing: bool) -> Self {
        Self {
            native_pdf_parsing,
            image_quality_scores: native_pdf_parsing,
            math_ocr: false,
            selection_marks: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One call to the OCR service.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub tier: OcrTier,
    pub options: ProcessOptions,
}

impl OcrRequest {
    pub fn pdf(content: Vec<u8>, tier: OcrTier, options: ProcessOptions) -> Self {
        Self {
            content,
            mime_type: "application/pdf".to_string(),
            tier,
            options,
        }
    }

    /// The same document at the basic tier, with every flag cleared.
    pub fn downgraded(&self) -> Self {
        Self {
            content: self.content.clone(),
            mime_type: self.mime_type.clone(),
            tier: OcrTier::Basic,
            options: ProcessOptions::default(),
        }
    }
}

/// A normalized (0..1) polygon vertex. Missing coordinates read as zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Parsed OCR result for one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrDocument {
    pub text: String,
    pub pages: Vec<OcrPage>,
    pub entities: Vec<OcrEntity>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrPage {
    /// 1-indexed.
    pub page_number: usize,
    pub width: f32,
    pub height: f32,
    pub text: String,
    pub confidence: f32,
    /// Paragraph-level text blocks in reading order.
    pub blocks: Vec<OcrBlock>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrBlock {
    pub text: String,
    pub polygon: Vec<Vertex>,
    pub confidence: f32,
}

impl OcrBlock {
    /// Vertical extent `(top, bottom)` of the polygon, if it has vertices.
    pub fn vertical_span(&self) -> Option<(f64, f64)> {
        let ys = self.polygon.iter().map(|v| v.y).filter(|y| y.is_finite());
        let (mut top, mut bottom) = (f64::INFINITY, f64::NEG_INFINITY);
        for y in ys {
            top = top.min(y);
            bottom = bottom.max(y);
        }
        (top <= bottom).then_some((top, bottom))
    }
}

/// A structured entity detected by the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrEntity {
    pub label: String,
    pub mention_text: String,
    pub confidence: f32,
    pub page_refs: Vec<OcrPageRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrPageRef {
    /// 0-indexed page of the submitted document.
    pub page_index: usize,
    pub vertices: Vec<Vertex>,
}

/// Errors from a single OCR call.
#[derive(Debug, Clone, Error)]
pub enum OcrError {
    #[error("OCR service not configured: {0}")]
    NotConfigured(String),

    #[error("OCR request failed: {0}")]
    Request(String),

    #[error("OCR service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("OCR call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Failed to decode OCR response: {0}")]
    Decode(String),
}

/// The external OCR service.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Process one document at the requested tier.
    async fn process(&self, request: &OcrRequest) -> Result<OcrDocument, OcrError>;
}
