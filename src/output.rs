//! The JSON report returned by a pipeline run.
//!
//! Field names follow the camelCase wire contract consumers already parse
//! (`croppedQAImages`, `totalQAEntities` keep their upper-case acronyms).

use crate::config::MappingMode;
use crate::error::ItemError;
use crate::model::{CompiledPage, EnhancedEntity, Entity, EntityType};
use crate::ocr::OcrTier;
use crate::pipeline::encode::serialize_base64;
use crate::pipeline::geometry::PixelRect;
use serde::{Deserialize, Serialize};

/// Terminal state of a run that did not fail fatally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineOutcome {
    /// Stage 1 and stage 2 both completed.
    Full,
    /// Stage 1 completed; stage 2 was skipped, failed or was cancelled.
    Stage1Only,
    /// Extraction found no entities at all.
    Partial,
}

/// Top-level report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineReport {
    /// True for every non-fatal run, including stage-1-only ones.
    pub success: bool,
    pub outcome: PipelineOutcome,
    pub stage1: Stage1Report,
    pub stage2: Stage2Report,
    pub pipeline: PipelineSummary,
    /// Non-fatal page, entity and slot failures.
    pub diagnostics: Vec<ItemError>,
    pub stats: PipelineStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage1Report {
    pub text: String,
    pub pages: Vec<Stage1Page>,
    pub total_pages: usize,
    pub all_entities: Vec<Entity>,
    pub qa_entities: Vec<IndexedEntity>,
    #[serde(rename = "croppedQAImages")]
    pub cropped_qa_images: Vec<CroppedImageRecord>,
    /// Tier that actually served extraction.
    pub processor_type: OcrTier,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage1Page {
    pub page_number: usize,
    pub text: String,
    pub width: f32,
    pub height: f32,
    /// Padded union of the page's question/answer regions, in raster pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qa_region: Option<PixelRect>,
}

/// An entity together with its position in the extractor's output.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedEntity {
    pub original_index: usize,
    #[serde(flatten)]
    pub entity: Entity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CroppedImageRecord {
    pub original_index: usize,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub page_number: usize,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "imageBase64", serialize_with = "serialize_base64")]
    pub image_bytes: Vec<u8>,
}

/// Stage-2 section: either a completed enhancement or why there is none.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Stage2Report {
    Completed(Stage2Completed),
    Skipped(Stage2Skipped),
}

impl Stage2Report {
    pub fn skipped(message: impl Into<String>) -> Self {
        Stage2Report::Skipped(Stage2Skipped {
            success: false,
            message: message.into(),
        })
    }

    pub fn success(&self) -> bool {
        matches!(self, Stage2Report::Completed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage2Completed {
    pub success: bool,
    pub enhanced_entities: Vec<EnhancedEntity>,
    /// Tier that actually served enhancement.
    pub processor_type: OcrTier,
    /// Question/answer entities found in stage 1.
    pub stage1_count: usize,
    /// Pages returned by the enhancement call.
    pub stage2_count: usize,
    pub mapped_count: usize,
    pub math_ocr_enabled: bool,
    pub mapping_mode: MappingMode,
    /// The `originalIndex → (pageIndex, slot)` table.
    pub compiled_pages: Vec<CompiledPage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stage2Skipped {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub two_stage_enabled: bool,
    pub math_ocr_applied: bool,
    #[serde(rename = "totalQAEntities")]
    pub total_qa_entities: usize,
    pub enhanced_entities: usize,
    pub filename: String,
}

/// Counts and per-stage wall-clock times.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub total_pages: usize,
    pub rendered_pages: usize,
    pub entities: usize,
    pub qa_entities: usize,
    pub cropped: usize,
    pub compiled_pages: usize,
    pub enhanced_entities: usize,
    pub failed_items: usize,
    pub rasterize_ms: u64,
    pub extract_ms: u64,
    pub crop_ms: u64,
    pub compile_ms: u64,
    pub enhance_ms: u64,
    pub map_ms: u64,
    pub total_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_stage2_serialises_flat() {
        let json = serde_json::to_value(Stage2Report::skipped("premium OCR unavailable")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "premium OCR unavailable");
    }

    #[test]
    fn outcome_and_acronym_fields() {
        assert_eq!(
            serde_json::to_string(&PipelineOutcome::Stage1Only).unwrap(),
            "\"stage1Only\""
        );
        let summary = PipelineSummary {
            two_stage_enabled: true,
            math_ocr_applied: false,
            total_qa_entities: 5,
            enhanced_entities: 0,
            filename: "paper.pdf".into(),
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["totalQAEntities"], 5);
        assert_eq!(json["twoStageEnabled"], true);
    }

    #[test]
    fn indexed_entity_is_flattened() {
        let e = IndexedEntity {
            original_index: 2,
            entity: Entity {
                entity_type: EntityType::Question,
                label: "question".into(),
                page_number: 1,
                text: "Q".into(),
                bounding_polygon: vec![],
                confidence: 0.9,
                heuristic: false,
            },
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["originalIndex"], 2);
        assert_eq!(json["type"], "Question");
    }

    #[test]
    fn cropped_image_is_base64() {
        let rec = CroppedImageRecord {
            original_index: 0,
            entity_type: EntityType::Answer,
            page_number: 1,
            width: 1,
            height: 1,
            image_bytes: b"hi".to_vec(),
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["imageBase64"], "aGk=");
    }
}
