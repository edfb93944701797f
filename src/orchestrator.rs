//! Pipeline orchestration: sequence the stages and decide how far a run got.
//!
//! ```text
//! START → RASTERIZE → EXTRACT ─┬─ no entities ───────────────▶ Partial
//!                              └─ CROP ─┬─ nothing cropped ──▶ Stage1Only
//!                                       └─ COMPILE → ENHANCE ─┬─ failed ─▶ Stage1Only
//!                                                             └─ MAP ────▶ Full
//! ```
//!
//! Only a bad input, an unusable PDF, extraction failing on every tier, or
//! cancellation before extraction finished return `Err`. Anything that goes
//! wrong from cropping onwards degrades the report instead: `success`
//! stays true and `stage2.success` tells the caller whether enhancement
//! happened.

use crate::cancel::CancelFlag;
use crate::config::PipelineConfig;
use crate::error::{ItemError, PipelineError, Stage};
use crate::model::{CroppedEntity, RasterPage};
use crate::ocr::{DocumentAiClient, DocumentAiConfig, OcrOutcome, OcrService, OcrTier};
use crate::output::{
    CroppedImageRecord, IndexedEntity, PipelineOutcome, PipelineReport, PipelineStats,
    PipelineSummary, Stage1Page, Stage1Report, Stage2Completed, Stage2Report,
};
use crate::pipeline::compile::compile;
use crate::pipeline::crop::crop_all;
use crate::pipeline::enhance::enhance;
use crate::pipeline::extract::{extract, Extraction};
use crate::pipeline::geometry::master_region;
use crate::pipeline::input::{decode_input, PipelineInput};
use crate::pipeline::map::map_entities;
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A configured pipeline. Cheap to share; runs do not interfere.
pub struct Pipeline {
    config: PipelineConfig,
    ocr: Arc<dyn OcrService>,
    rasterizer: Arc<dyn Rasterizer>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        ocr: Arc<dyn OcrService>,
        rasterizer: Arc<dyn Rasterizer>,
    ) -> Self {
        Self {
            config,
            ocr,
            rasterizer,
        }
    }

    /// Production wiring: Document AI for OCR, pdfium for rendering.
    pub fn with_document_ai(
        config: PipelineConfig,
        ocr_config: DocumentAiConfig,
    ) -> Result<Self, PipelineError> {
        let client = DocumentAiClient::new(ocr_config, config.ocr_timeout())
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        let rasterizer = PdfiumRasterizer::new(config.max_rendered_pixels);
        Ok(Self::new(config, Arc::new(client), Arc::new(rasterizer)))
    }

    /// Run the pipeline on one document.
    ///
    /// # Errors
    /// Returns `Err(PipelineError)` only for fatal conditions:
    /// - the payload is not base64 or not a PDF
    /// - pdfium cannot load the document or render a single page
    /// - extraction failed on every OCR tier
    /// - `cancel` fired before extraction completed
    pub async fn run(
        &self,
        input: &PipelineInput,
        cancel: &CancelFlag,
    ) -> Result<PipelineReport, PipelineError> {
        let total_start = Instant::now();
        info!("Starting pipeline: {}", input.filename);

        let pdf = Arc::new(decode_input(input)?);
        let mut diagnostics: Vec<ItemError> = Vec::new();
        let mut stats = PipelineStats::default();

        // ── Rasterize ────────────────────────────────────────────────────
        ensure_not_cancelled(cancel, Stage::Rasterize)?;
        self.stage_start(Stage::Rasterize);
        let t = Instant::now();
        let raster = self.rasterizer.rasterize(Arc::clone(&pdf)).await?;
        stats.rasterize_ms = elapsed_ms(t);
        stats.rendered_pages = raster.pages.len();
        self.record_failures(Stage::Rasterize, raster.failures, &mut diagnostics);
        self.stage_complete(Stage::Rasterize, stats.rendered_pages, stats.rasterize_ms);
        let pages = Arc::new(raster.pages);

        // ── Extract ──────────────────────────────────────────────────────
        ensure_not_cancelled(cancel, Stage::Extract)?;
        self.stage_start(Stage::Extract);
        let t = Instant::now();
        let extraction = extract(
            self.ocr.as_ref(),
            &pdf,
            self.config.extraction_tier,
            &self.config,
        )
        .await?;
        ensure_not_cancelled(cancel, Stage::Extract)?;
        stats.extract_ms = elapsed_ms(t);
        stats.entities = extraction.entities.len();
        stats.qa_entities = extraction.qa_count();
        self.stage_complete(Stage::Extract, stats.entities, stats.extract_ms);

        let mut stage1 = self.stage1_report(&extraction, &pages, diagnostics.len());
        stats.total_pages = stage1.total_pages;

        if extraction.entities.is_empty() {
            warn!("No entities detected in '{}'", input.filename);
            let stage2 = Stage2Report::skipped("No entities detected in stage 1");
            return Ok(self.finish(
                input,
                PipelineOutcome::Partial,
                stage1,
                stage2,
                diagnostics,
                stats,
                total_start,
            ));
        }

        // ── Crop ─────────────────────────────────────────────────────────
        let cropped = if cancel.is_cancelled() {
            None
        } else {
            self.stage_start(Stage::Crop);
            let t = Instant::now();
            let outcome = crop_all(
                Arc::clone(&pages),
                &extraction.entities,
                self.config.crop_concurrency,
                cancel,
                self.config.progress_callback.as_ref(),
            )
            .await;
            stats.crop_ms = elapsed_ms(t);
            stats.cropped = outcome.cropped.len();
            self.record_failures(Stage::Crop, outcome.failures, &mut diagnostics);
            self.stage_complete(Stage::Crop, stats.cropped, stats.crop_ms);
            stage1.cropped_qa_images = outcome.cropped.iter().map(image_record).collect();
            (!outcome.cancelled).then_some(outcome.cropped)
        };

        let stage2 = match cropped {
            None => Stage2Report::skipped("Pipeline cancelled before stage 2"),
            Some(cropped) if cropped.is_empty() => {
                Stage2Report::skipped("No question/answer entity could be cropped")
            }
            Some(_) if !self.config.enable_stage2 => Stage2Report::skipped("Stage 2 disabled"),
            Some(cropped) => {
                match self
                    .run_stage2(cropped, stats.qa_entities, cancel, &mut diagnostics, &mut stats)
                    .await
                {
                    Ok(done) => Stage2Report::Completed(done),
                    Err(reason) => {
                        warn!("Stage 2 unavailable, returning stage 1 only: {}", reason);
                        Stage2Report::skipped(reason)
                    }
                }
            }
        };

        let outcome = if stage2.success() {
            PipelineOutcome::Full
        } else {
            PipelineOutcome::Stage1Only
        };
        Ok(self.finish(
            input,
            outcome,
            stage1,
            stage2,
            diagnostics,
            stats,
            total_start,
        ))
    }

    /// Compile, enhance and map. `Err` carries the reason stage 2 is missing.
    async fn run_stage2(
        &self,
        cropped: Vec<CroppedEntity>,
        stage1_count: usize,
        cancel: &CancelFlag,
        diagnostics: &mut Vec<ItemError>,
        stats: &mut PipelineStats,
    ) -> Result<Stage2Completed, String> {
        // ── Compile ──────────────────────────────────────────────────────
        self.stage_start(Stage::Compile);
        let t = Instant::now();
        let cropped = Arc::new(cropped);
        let to_compile = Arc::clone(&cropped);
        let compiled = tokio::task::spawn_blocking(move || compile(&to_compile))
            .await
            .map_err(|e| format!("Compile task panicked: {}", e))?
            .map_err(|e| format!("Compilation failed: {}", e))?;
        stats.compile_ms = elapsed_ms(t);
        stats.compiled_pages = compiled.pages.len();
        self.record_failures(Stage::Compile, compiled.failures.clone(), diagnostics);
        self.stage_complete(Stage::Compile, stats.compiled_pages, stats.compile_ms);

        if compiled.embedded_count() == 0 {
            return Err("No cropped image could be embedded in the compiled PDF".to_string());
        }
        if cancel.is_cancelled() {
            return Err("Pipeline cancelled before enhancement".to_string());
        }

        // ── Enhance ──────────────────────────────────────────────────────
        self.stage_start(Stage::Enhance);
        let t = Instant::now();
        let (tier, enhancement) =
            match enhance(self.ocr.as_ref(), &compiled.pdf_bytes, &self.config).await {
                OcrOutcome::Success { tier, data } => (tier, data),
                OcrOutcome::Failure {
                    tried_tiers,
                    last_error,
                } => {
                    return Err(format!(
                        "Enhancement failed on {:?}: {}",
                        tried_tiers, last_error
                    ))
                }
            };
        stats.enhance_ms = elapsed_ms(t);
        self.stage_complete(Stage::Enhance, enhancement.pages.len(), stats.enhance_ms);

        if cancel.is_cancelled() {
            return Err("Pipeline cancelled before mapping".to_string());
        }

        // ── Map ──────────────────────────────────────────────────────────
        self.stage_start(Stage::Map);
        let t = Instant::now();
        let mapping = map_entities(
            &compiled.pages,
            &cropped,
            &enhancement.pages,
            self.config.mapping_mode,
        );
        stats.map_ms = elapsed_ms(t);
        stats.enhanced_entities = mapping.entities.len();
        self.record_failures(Stage::Map, mapping.skipped, diagnostics);
        self.stage_complete(Stage::Map, stats.enhanced_entities, stats.map_ms);

        Ok(Stage2Completed {
            success: true,
            mapped_count: mapping.entities.len(),
            enhanced_entities: mapping.entities,
            processor_type: tier,
            stage1_count,
            stage2_count: enhancement.pages.len(),
            math_ocr_enabled: tier == OcrTier::Premium,
            mapping_mode: self.config.mapping_mode,
            compiled_pages: compiled.pages,
        })
    }

    /// Run and write the pretty-printed JSON report to `path` atomically.
    pub async fn run_to_file(
        &self,
        input: &PipelineInput,
        path: impl AsRef<Path>,
        cancel: &CancelFlag,
    ) -> Result<PipelineStats, PipelineError> {
        let report = self.run(input, cancel).await?;
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&report)
            .map_err(|e| PipelineError::Internal(format!("Report serialisation failed: {}", e)))?;

        // Atomic write: write to temp, then rename
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::OutputWriteFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| PipelineError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| PipelineError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(report.stats)
    }

    /// Synchronous wrapper around [`Pipeline::run`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn run_sync(&self, input: &PipelineInput) -> Result<PipelineReport, PipelineError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run(input, &CancelFlag::new()))
    }

    // ── Report assembly ──────────────────────────────────────────────────

    fn stage1_report(
        &self,
        extraction: &Extraction,
        pages: &[RasterPage],
        render_failures: usize,
    ) -> Stage1Report {
        let doc = &extraction.document;
        let page_records: Vec<Stage1Page> = doc
            .pages
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let qa_region = pages.iter().find(|r| r.index == i).and_then(|r| {
                    master_region(
                        &extraction.entities,
                        i,
                        r.pixel_width,
                        r.pixel_height,
                        self.config.master_region_padding,
                    )
                    .ok()
                });
                Stage1Page {
                    page_number: i + 1,
                    text: p.text.clone(),
                    width: p.width,
                    height: p.height,
                    qa_region,
                }
            })
            .collect();

        Stage1Report {
            text: doc.text.clone(),
            total_pages: page_records.len().max(pages.len() + render_failures),
            pages: page_records,
            all_entities: extraction.entities.clone(),
            qa_entities: extraction
                .entities
                .iter()
                .enumerate()
                .filter(|(_, e)| e.entity_type.is_qa())
                .map(|(original_index, e)| IndexedEntity {
                    original_index,
                    entity: e.clone(),
                })
                .collect(),
            cropped_qa_images: Vec::new(),
            processor_type: extraction.tier,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        input: &PipelineInput,
        outcome: PipelineOutcome,
        stage1: Stage1Report,
        stage2: Stage2Report,
        diagnostics: Vec<ItemError>,
        mut stats: PipelineStats,
        total_start: Instant,
    ) -> PipelineReport {
        stats.failed_items = diagnostics.len();
        stats.total_ms = elapsed_ms(total_start);

        let (enhanced, math_ocr_applied) = match &stage2 {
            Stage2Report::Completed(done) => (done.enhanced_entities.len(), done.math_ocr_enabled),
            Stage2Report::Skipped(_) => (0, false),
        };

        info!(
            "Pipeline finished for '{}': {:?}, {} entities, {} enhanced, {} diagnostics in {}ms",
            input.filename,
            outcome,
            stats.entities,
            enhanced,
            diagnostics.len(),
            stats.total_ms
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_pipeline_complete(outcome);
        }

        PipelineReport {
            success: true,
            outcome,
            pipeline: PipelineSummary {
                two_stage_enabled: self.config.enable_stage2,
                math_ocr_applied,
                total_qa_entities: stage1.qa_entities.len(),
                enhanced_entities: enhanced,
                filename: input.filename.clone(),
            },
            stage1,
            stage2,
            diagnostics,
            stats,
        }
    }

    // ── Progress plumbing ────────────────────────────────────────────────

    fn stage_start(&self, stage: Stage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(stage);
        }
    }

    fn stage_complete(&self, stage: Stage, items: usize, elapsed_ms: u64) {
        info!("{} finished: {} items in {}ms", stage, items, elapsed_ms);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(stage, items, elapsed_ms);
        }
    }

    fn record_failures(&self, stage: Stage, failures: Vec<ItemError>, into: &mut Vec<ItemError>) {
        if let Some(ref cb) = self.config.progress_callback {
            for f in &failures {
                cb.on_item_error(stage, f);
            }
        }
        into.extend(failures);
    }
}

/// Run one document with Document AI and pdfium, building both from config.
pub async fn run_pipeline(
    input: &PipelineInput,
    config: PipelineConfig,
    ocr_config: DocumentAiConfig,
) -> Result<PipelineReport, PipelineError> {
    Pipeline::with_document_ai(config, ocr_config)?
        .run(input, &CancelFlag::new())
        .await
}

fn ensure_not_cancelled(cancel: &CancelFlag, stage: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled { stage });
    }
    Ok(())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn image_record(c: &CroppedEntity) -> CroppedImageRecord {
    CroppedImageRecord {
        original_index: c.original_index,
        entity_type: c.entity.entity_type,
        page_number: c.entity.page_number,
        width: c.width,
        height: c.height,
        image_bytes: c.image_bytes.clone(),
    }
}
