//! Domain records flowing between pipeline stages.
//!
//! Each stage consumes the previous stage's collection and produces a new
//! one; nothing here is mutated after construction.

use crate::pipeline::encode::serialize_base64;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub use crate::ocr::Vertex;

/// Semantic class of a detected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Question,
    Answer,
    /// Anything else the service labels (diagrams, figures, headers).
    Image,
}

impl EntityType {
    /// Only questions and answers are cropped, compiled and enhanced.
    pub fn is_qa(&self) -> bool {
        matches!(self, EntityType::Question | EntityType::Answer)
    }
}

/// One page reference of an entity's outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRegion {
    /// 0-indexed source page.
    pub page_index: usize,
    pub vertices: Vec<Vertex>,
}

/// A detected question, answer or image region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    /// The service's own label, e.g. `question_text` or `diagram`.
    pub label: String,
    /// 1-indexed page of the first region.
    pub page_number: usize,
    pub text: String,
    pub bounding_polygon: Vec<PageRegion>,
    pub confidence: f32,
    /// Produced by paragraph segmentation rather than entity detection.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub heuristic: bool,
}

/// A rasterised source page.
#[derive(Debug, Clone)]
pub struct RasterPage {
    /// 0-indexed.
    pub index: usize,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub image: DynamicImage,
}

/// A question/answer entity together with its cropped pixels.
#[derive(Debug, Clone)]
pub struct CroppedEntity {
    /// Position in the extractor's output list; the correspondence key for
    /// every later stage.
    pub original_index: usize,
    pub entity: Entity,
    /// Lossless PNG.
    pub image_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Where an image landed inside its compiled cell, in PDF points
/// (origin bottom-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One entry of the `originalIndex → (pageIndex, slot)` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotAssignment {
    pub original_index: usize,
    pub page_index: usize,
    /// 0 is the top cell.
    pub slot: usize,
    /// False when the image could not be embedded and the cell is empty.
    pub embedded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

/// A page of the compiled PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledPage {
    /// 0-indexed.
    pub page_index: usize,
    /// 1..=4 slots in vertical order.
    pub slots: Vec<SlotAssignment>,
}

impl CompiledPage {
    pub fn embedded_slots(&self) -> impl Iterator<Item = &SlotAssignment> {
        self.slots.iter().filter(|s| s.embedded)
    }
}

/// A positioned text block of an enhanced page. `top`/`bottom` are
/// normalized (0 = top of page).
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub top: f64,
    pub bottom: f64,
    pub confidence: f32,
}

impl TextBlock {
    pub fn center(&self) -> f64 {
        (self.top + self.bottom) / 2.0
    }
}

/// Premium-tier output for one compiled page.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedPage {
    /// 1-indexed.
    pub page_number: usize,
    pub text: String,
    pub confidence: f32,
    pub blocks: Vec<TextBlock>,
}

/// A question/answer entity with its stage-2 text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedEntity {
    pub original_index: usize,
    pub original_entity_type: EntityType,
    pub original_page_number: usize,
    pub original_confidence: f32,
    pub original_text: String,
    #[serde(serialize_with = "serialize_base64")]
    pub original_image_bytes: Vec<u8>,
    pub enhanced_text: String,
    /// Equals some compiled `page_index + 1`.
    pub stage2_page_number: usize,
    pub stage2_slot: usize,
    pub stage2_confidence: f32,
    /// Enhanced minus original length, in characters.
    pub text_length_improvement: i64,
    /// Text was split heuristically rather than by position.
    pub best_effort: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_questions_and_answers_are_qa() {
        assert!(EntityType::Question.is_qa());
        assert!(EntityType::Answer.is_qa());
        assert!(!EntityType::Image.is_qa());
    }

    #[test]
    fn entity_serialises_type_field() {
        let e = Entity {
            entity_type: EntityType::Answer,
            label: "answer".into(),
            page_number: 2,
            text: "42".into(),
            bounding_polygon: vec![],
            confidence: 0.5,
            heuristic: false,
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "Answer");
        assert_eq!(json["pageNumber"], 2);
        assert!(json.get("heuristic").is_none());
    }
}
