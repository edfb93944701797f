//! Configuration for a pipeline run.
//!
//! Every knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The OCR service connection is configured
//! separately ([`crate::ocr::DocumentAiConfig`]) because it is shared
//! read-only across runs while this struct may differ per run.

use crate::error::PipelineError;
use crate::ocr::OcrTier;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration for one pipeline run.
///
/// # Example
/// ```rust
/// use twostage_ocr::{MappingMode, PipelineConfig};
///
/// let config = PipelineConfig::builder()
///     .ocr_timeout_secs(30)
///     .mapping_mode(MappingMode::PageOrder)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Longest edge of a rasterised page in pixels. Default: 2000.
    ///
    /// Exam scans are mostly A4/Letter; 2000 px on the long edge keeps
    /// small print and sub/superscripts legible in the crops.
    pub max_rendered_pixels: u32,

    /// Per-call OCR timeout in seconds. Default: 45.
    ///
    /// A timed-out call counts as a failure of that tier and triggers the
    /// basic-tier retry.
    pub ocr_timeout_secs: u64,

    /// Tier requested for entity extraction. Default: basic.
    pub extraction_tier: OcrTier,

    /// Ask the service to use embedded PDF text during extraction. Default: true.
    pub native_pdf_parsing: bool,

    /// Crop worker pool size. Default: number of CPUs.
    pub crop_concurrency: usize,

    /// Padding around each page's master region, in pixels. Default: 20.
    pub master_region_padding: u32,

    /// How enhanced page text is attributed to entities. Default: slot layout.
    pub mapping_mode: MappingMode,

    /// Segment paragraphs into entities when the service detects none. Default: true.
    pub heuristic_segmentation: bool,

    /// Run stage 2 (compile + premium OCR). Default: true.
    pub enable_stage2: bool,

    /// Optional per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            ocr_timeout_secs: 45,
            extraction_tier: OcrTier::Basic,
            native_pdf_parsing: true,
            crop_concurrency: num_cpus::get().max(1),
            master_region_padding: 20,
            mapping_mode: MappingMode::default(),
            heuristic_segmentation: true,
            enable_stage2: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("extraction_tier", &self.extraction_tier)
            .field("native_pdf_parsing", &self.native_pdf_parsing)
            .field("crop_concurrency", &self.crop_concurrency)
            .field("master_region_padding", &self.master_region_padding)
            .field("mapping_mode", &self.mapping_mode)
            .field("heuristic_segmentation", &self.heuristic_segmentation)
            .field("enable_stage2", &self.enable_stage2)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn extraction_tier(mut self, tier: OcrTier) -> Self {
        self.config.extraction_tier = tier;
        self
    }

    pub fn native_pdf_parsing(mut self, v: bool) -> Self {
        self.config.native_pdf_parsing = v;
        self
    }

    pub fn crop_concurrency(mut self, n: usize) -> Self {
        self.config.crop_concurrency = n.max(1);
        self
    }

    pub fn master_region_padding(mut self, px: u32) -> Self {
        self.config.master_region_padding = px;
        self
    }

    pub fn mapping_mode(mut self, mode: MappingMode) -> Self {
        self.config.mapping_mode = mode;
        self
    }

    pub fn heuristic_segmentation(mut self, v: bool) -> Self {
        self.config.heuristic_segmentation = v;
        self
    }

    pub fn enable_stage2(mut self, v: bool) -> Self {
        self.config.enable_stage2 = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.ocr_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "OCR timeout must be ≥ 1 second".into(),
            ));
        }
        if c.ocr_timeout_secs > 600 {
            return Err(PipelineError::InvalidConfig(format!(
                "OCR timeout must be ≤ 600 seconds, got {}",
                c.ocr_timeout_secs
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the text of a compiled page is attributed to the entities on it.
///
/// | Mode | Records per compiled page |
/// |------|---------------------------|
/// | `SlotLayout` | one per embedded slot (up to 4) |
/// | `PageOrder` | exactly one, owned by the first embedded slot |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MappingMode {
    /// Split page text across slots by vertical position. (default)
    #[default]
    SlotLayout,
    /// Whole page text to a single owner.
    PageOrder,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.max_rendered_pixels, 2000);
        assert_eq!(c.ocr_timeout(), Duration::from_secs(45));
        assert_eq!(c.extraction_tier, OcrTier::Basic);
        assert_eq!(c.mapping_mode, MappingMode::SlotLayout);
        assert!(c.crop_concurrency >= 1);
        assert!(c.enable_stage2);
    }

    #[test]
    fn builder_clamps_and_validates() {
        let c = PipelineConfig::builder()
            .crop_concurrency(0)
            .max_rendered_pixels(10)
            .build()
            .unwrap();
        assert_eq!(c.crop_concurrency, 1);
        assert_eq!(c.max_rendered_pixels, 100);

        let err = PipelineConfig::builder().ocr_timeout_secs(0).build();
        assert!(matches!(err, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn debug_hides_callback() {
        let dbg = format!("{:?}", PipelineConfig::default());
        assert!(dbg.contains("progress_callback: None"));
    }
}
