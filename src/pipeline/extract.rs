//! Entity extraction: one basic-tier OCR call over the source PDF.
//!
//! The service's own labels decide the entity type: anything whose label
//! contains "question" or "answer" (case-insensitive) is a question/answer
//! entity and flows on to cropping; everything else (diagrams, headers,
//! figures) is kept in the report as an `Image` entity but never cropped.
//!
//! When the service returns no structured entities at all, paragraphs can
//! be grouped into entities by their leading markers. That fallback is
//! marked `heuristic` on every entity it produces.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Stage};
use crate::model::{Entity, EntityType, PageRegion, Vertex};
use crate::ocr::{
    run_with_downgrade, OcrBlock, OcrDocument, OcrEntity, OcrOutcome, OcrRequest, OcrService,
    OcrTier, ProcessOptions,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

/// What stage 1 learned about the document.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Tier that actually produced the result.
    pub tier: OcrTier,
    pub document: OcrDocument,
    /// In service order; a position in this list is the entity's
    /// `original_index`.
    pub entities: Vec<Entity>,
}

impl Extraction {
    pub fn qa_count(&self) -> usize {
        self.entities.iter().filter(|e| e.entity_type.is_qa()).count()
    }
}

/// Run entity extraction on `pdf` at `tier`, downgrading to basic on failure.
///
/// Fails with [`PipelineError::ServiceUnavailable`] only when every tier failed.
pub async fn extract(
    service: &dyn OcrService,
    pdf: &[u8],
    tier: OcrTier,
    config: &PipelineConfig,
) -> Result<Extraction, PipelineError> {
    let request = OcrRequest::pdf(
        pdf.to_vec(),
        tier,
        ProcessOptions::extraction(config.native_pdf_parsing),
    );

    let (tier, document) = match run_with_downgrade(service, &request, config.ocr_timeout()).await
    {
        OcrOutcome::Success { tier, data } => (tier, data),
        OcrOutcome::Failure {
            tried_tiers,
            last_error,
        } => {
            return Err(PipelineError::ServiceUnavailable {
                stage: Stage::Extract,
                tried_tiers,
                detail: last_error.to_string(),
            })
        }
    };

    debug!(
        "Service returned {} entities, {} labelled question/answer",
        document.entities.len(),
        document.entities.iter().filter(|e| is_qa(&e.label)).count()
    );
    let mut entities: Vec<Entity> = document.entities.iter().map(to_entity).collect();

    if entities.is_empty() && config.heuristic_segmentation {
        entities = heuristic_entities(&document);
        if !entities.is_empty() {
            warn!(
                "OCR service detected no entities; segmented {} from paragraph markers",
                entities.len()
            );
        }
    }

    info!(
        "Extracted {} entities ({} question/answer) via {} tier",
        entities.len(),
        entities.iter().filter(|e| e.entity_type.is_qa()).count(),
        tier
    );

    Ok(Extraction {
        tier,
        document,
        entities,
    })
}

/// True when the service label names a question or an answer.
pub fn is_qa(label: &str) -> bool {
    classify_label(label).is_qa()
}

/// Map a service label onto an [`EntityType`].
pub fn classify_label(label: &str) -> EntityType {
    let lower = label.to_lowercase();
    if lower.contains("question") {
        EntityType::Question
    } else if lower.contains("answer") {
        EntityType::Answer
    } else {
        EntityType::Image
    }
}

fn to_entity(e: &OcrEntity) -> Entity {
    let bounding_polygon: Vec<PageRegion> = e
        .page_refs
        .iter()
        .map(|r| PageRegion {
            page_index: r.page_index,
            vertices: r.vertices.clone(),
        })
        .collect();

    Entity {
        entity_type: classify_label(&e.label),
        label: e.label.clone(),
        page_number: bounding_polygon.first().map_or(1, |r| r.page_index + 1),
        text: e.mention_text.clone(),
        bounding_polygon,
        confidence: e.confidence,
        heuristic: false,
    }
}

// ── Heuristic segmentation ───────────────────────────────────────────────────

static RE_ANSWER_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?i:answer\b|ans\b|a\s*:)").unwrap());

static RE_QUESTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?i:q(?:uestion)?\s*\d+|\d+\s*[.)]|\([a-z]{1,4}\))").unwrap()
});

fn marker_type(text: &str) -> Option<EntityType> {
    if RE_ANSWER_MARKER.is_match(text) {
        Some(EntityType::Answer)
    } else if RE_QUESTION_MARKER.is_match(text) {
        Some(EntityType::Question)
    } else {
        None
    }
}

/// Group paragraph blocks into entities by leading question/answer markers.
///
/// A marked block opens a new entity; unmarked blocks extend the open one.
/// Blocks before the first marker on a page (headers, instructions) are
/// dropped. Entities never span pages.
pub fn heuristic_entities(document: &OcrDocument) -> Vec<Entity> {
    let mut entities = Vec::new();

    for (page_index, page) in document.pages.iter().enumerate() {
        let mut open: Option<(EntityType, Vec<&OcrBlock>)> = None;

        for block in &page.blocks {
            if block.text.trim().is_empty() || block.vertical_span().is_none() {
                continue;
            }
            match marker_type(&block.text) {
                Some(kind) => {
                    if let Some((prev_kind, blocks)) = open.take() {
                        entities.push(group_entity(prev_kind, page_index, &blocks));
                    }
                    open = Some((kind, vec![block]));
                }
                None => {
                    if let Some((_, blocks)) = open.as_mut() {
                        blocks.push(block);
                    }
                }
            }
        }

        if let Some((kind, blocks)) = open {
            entities.push(group_entity(kind, page_index, &blocks));
        }
    }

    debug!("Heuristic segmentation produced {} entities", entities.len());
    entities
}

fn group_entity(entity_type: EntityType, page_index: usize, blocks: &[&OcrBlock]) -> Entity {
    let (mut x0, mut y0) = (f64::INFINITY, f64::INFINITY);
    let (mut x1, mut y1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for v in blocks.iter().flat_map(|b| b.polygon.iter()) {
        if v.x.is_finite() && v.y.is_finite() {
            x0 = x0.min(v.x);
            y0 = y0.min(v.y);
            x1 = x1.max(v.x);
            y1 = y1.max(v.y);
        }
    }

    let text = blocks
        .iter()
        .map(|b| b.text.trim())
        .collect::<Vec<_>>()
        .join("\n");
    let confidence =
        blocks.iter().map(|b| b.confidence).sum::<f32>() / blocks.len().max(1) as f32;

    Entity {
        entity_type,
        label: match entity_type {
            EntityType::Answer => "answer",
            _ => "question",
        }
        .to_string(),
        page_number: page_index + 1,
        text,
        bounding_polygon: vec![PageRegion {
            page_index,
            vertices: vec![
                Vertex::new(x0, y0),
                Vertex::new(x1, y0),
                Vertex::new(x1, y1),
                Vertex::new(x0, y1),
            ],
        }],
        confidence,
        heuristic: true,
    }
}
