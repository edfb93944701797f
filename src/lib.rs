//! # twostage-ocr
//!
//! Recover per-question text from scanned exam papers with a two-stage OCR
//! pipeline that keeps the expensive premium pass cheap.
//!
//! ## Why two stages?
//!
//! Premium OCR (math formulas, selection marks) is billed per page. Exam
//! scans carry a lot of paper that is not a question or an answer: margins,
//! headers, diagrams, instructions. Stage 1 runs basic OCR over the whole
//! document to find the question/answer regions; stage 2 crops those
//! regions, packs them four to a page into a compact synthetic PDF and sends
//! only that to the premium tier. The recognised text is then mapped back to
//! the entities it came from.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF (base64)
//!  │
//!  ├─ 1. Rasterize  every page via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 2. Extract    entities via basic OCR (premium → basic fallback)
//!  ├─ 3. Crop       question/answer regions on a bounded worker pool
//!  ├─ 4. Compile    4 crops per Letter page, aspect-preserving
//!  ├─ 5. Enhance    premium OCR over the compiled PDF
//!  └─ 6. Map        enhanced text → original entities by slot
//! ```
//!
//! A run always returns the best result it has: if stage 2 fails the report
//! still carries every stage-1 entity, with `stage2.success == false`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use twostage_ocr::{run_pipeline, DocumentAiConfig, PipelineConfig, PipelineInput};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bytes = std::fs::read("paper.pdf")?;
//!     let input = PipelineInput::from_bytes(&bytes, "paper.pdf");
//!     let report = run_pipeline(&input, PipelineConfig::default(), DocumentAiConfig::from_env()?).await?;
//!     println!("{:?}: {} enhanced entities", report.outcome, report.pipeline.enhanced_entities);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `twostage-ocr` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod ocr;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use cancel::CancelFlag;
pub use config::{MappingMode, PipelineConfig, PipelineConfigBuilder};
pub use error::{ItemError, PipelineError, Stage};
pub use model::{CroppedEntity, EnhancedEntity, Entity, EntityType};
pub use ocr::{DocumentAiClient, DocumentAiConfig, OcrService, OcrTier};
pub use orchestrator::{run_pipeline, Pipeline};
pub use output::{PipelineOutcome, PipelineReport, PipelineStats};
pub use pipeline::input::PipelineInput;
pub use pipeline::render::{PdfiumRasterizer, RasterOutput, Rasterizer};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
