//! Mapping: enhanced page text back onto the entities that produced it.
//!
//! Enhanced page `i` corresponds to compiled page `i`; the compiler's slot
//! table says which entities sit on it and where. How the page's text is
//! divided among them depends on [`MappingMode`]:
//!
//! * `SlotLayout` hands every positioned text block to the slot whose cell
//!   contains the block's vertical centre (nearest cell otherwise). A page
//!   with a single owner takes the whole text. When the layout is ambiguous
//!   (no positioned blocks, a block overlapping more than one owner's cell,
//!   or an owner left without blocks) the page is split by
//!   [`split_segments`] instead and every record built from it is marked
//!   `best_effort`.
//! * `PageOrder` yields one record per compiled page, owned by its first
//!   embedded slot.

use crate::config::MappingMode;
use crate::error::ItemError;
use crate::model::{CompiledPage, CroppedEntity, EnhancedEntity, EnhancedPage, SlotAssignment};
use crate::pipeline::compile::slot_span_normalized;
use crate::pipeline::segment::split_segments;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Mapped entities plus the enhanced pages that had nowhere to go.
#[derive(Debug, Clone, Default)]
pub struct MappingResult {
    /// Ascending by `original_index`.
    pub entities: Vec<EnhancedEntity>,
    pub skipped: Vec<ItemError>,
}

/// Attribute each enhanced page's text to the entities compiled onto it.
pub fn map_entities(
    compiled: &[CompiledPage],
    cropped: &[CroppedEntity],
    enhanced: &[EnhancedPage],
    mode: MappingMode,
) -> MappingResult {
    let by_index: HashMap<usize, &CroppedEntity> =
        cropped.iter().map(|c| (c.original_index, c)).collect();
    let mut result = MappingResult::default();

    for (i, page) in enhanced.iter().enumerate() {
        let owners: Vec<(&SlotAssignment, &CroppedEntity)> = match compiled.get(i) {
            Some(cp) => cp
                .embedded_slots()
                .filter_map(|s| by_index.get(&s.original_index).map(|c| (s, *c)))
                .collect(),
            None => Vec::new(),
        };

        if owners.is_empty() {
            warn!(
                "Enhanced page {} has no compiled entities; skipping",
                page.page_number
            );
            result.skipped.push(ItemError::MappingSkipped {
                page_number: page.page_number,
            });
            continue;
        }

        let assigned = match mode {
            MappingMode::PageOrder => vec![Assigned::whole_page(page)],
            MappingMode::SlotLayout if owners.len() == 1 => vec![Assigned::whole_page(page)],
            MappingMode::SlotLayout => by_layout(page, &owners).unwrap_or_else(|| {
                debug!(
                    "Enhanced page {} has no unambiguous layout; splitting text",
                    page.page_number
                );
                segmented(page, owners.len())
            }),
        };

        for ((slot, entity), a) in owners.iter().zip(assigned) {
            debug!(
                "Entity {} ← compiled page {} slot {} ({} chars)",
                entity.original_index,
                slot.page_index + 1,
                slot.slot,
                a.text.chars().count()
            );
            result.entities.push(enhanced_entity(entity, slot, a));
        }
    }

    result.entities.sort_by_key(|e| e.original_index);
    result
}

struct Assigned {
    text: String,
    confidence: f32,
    best_effort: bool,
}

impl Assigned {
    fn whole_page(page: &EnhancedPage) -> Self {
        Self {
            text: page.text.trim().to_string(),
            confidence: page.confidence,
            best_effort: false,
        }
    }
}

/// One `Assigned` per owner, in owner order, or `None` when positions cannot
/// tell the owners apart.
fn by_layout(
    page: &EnhancedPage,
    owners: &[(&SlotAssignment, &CroppedEntity)],
) -> Option<Vec<Assigned>> {
    let spans: Vec<(f64, f64)> = owners
        .iter()
        .map(|(s, _)| slot_span_normalized(s.slot))
        .collect();
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); owners.len()];

    for (b, block) in page.blocks.iter().enumerate() {
        let overlapped = spans
            .iter()
            .filter(|&&(top, bottom)| block.bottom.min(bottom) > block.top.max(top))
            .count();
        if overlapped > 1 {
            debug!(
                "Block {} on enhanced page {} straddles {} cells",
                b, page.page_number, overlapped
            );
            return None;
        }

        let centre = block.center();
        let nearest = spans
            .iter()
            .enumerate()
            .map(|(k, &(top, bottom))| {
                let distance = if centre < top {
                    top - centre
                } else if centre > bottom {
                    centre - bottom
                } else {
                    0.0
                };
                (k, distance)
            })
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(k, _)| k);
        if let Some(k) = nearest {
            buckets[k].push(b);
        }
    }

    if buckets.iter().any(Vec::is_empty) {
        return None;
    }

    let assigned = buckets
        .into_iter()
        .map(|blocks| {
            let text = blocks
                .iter()
                .map(|&b| page.blocks[b].text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            let confidence = if blocks.is_empty() {
                page.confidence
            } else {
                blocks.iter().map(|&b| page.blocks[b].confidence).sum::<f32>()
                    / blocks.len() as f32
            };
            Assigned {
                text,
                confidence,
                best_effort: false,
            }
        })
        .collect();
    Some(assigned)
}

/// Split the page text by order; every record is best-effort.
fn segmented(page: &EnhancedPage, owners: usize) -> Vec<Assigned> {
    let source = if page.text.trim().is_empty() {
        page.blocks
            .iter()
            .map(|b| b.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n")
    } else {
        page.text.clone()
    };
    split_segments(&source, owners)
        .into_iter()
        .map(|text| Assigned {
            text,
            confidence: page.confidence,
            best_effort: true,
        })
        .collect()
}

fn enhanced_entity(c: &CroppedEntity, slot: &SlotAssignment, a: Assigned) -> EnhancedEntity {
    let improvement = a.text.chars().count() as i64 - c.entity.text.chars().count() as i64;
    EnhancedEntity {
        original_index: c.original_index,
        original_entity_type: c.entity.entity_type,
        original_page_number: c.entity.page_number,
        original_confidence: c.entity.confidence,
        original_text: c.entity.text.clone(),
        original_image_bytes: c.image_bytes.clone(),
        enhanced_text: a.text,
        stage2_page_number: slot.page_index + 1,
        stage2_slot: slot.slot,
        stage2_confidence: a.confidence,
        text_length_improvement: improvement,
        best_effort: a.best_effort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityType, TextBlock};

    fn cropped(original_index: usize, text: &str) -> CroppedEntity {
        CroppedEntity {
            original_index,
            entity: Entity {
                entity_type: EntityType::Question,
                label: "question".into(),
                page_number: 1,
                text: text.into(),
                bounding_polygon: vec![],
                confidence: 0.5,
                heuristic: false,
            },
            image_bytes: vec![1, 2, 3],
            width: 10,
            height: 10,
        }
    }

    fn compiled(pages: &[&[usize]]) -> Vec<CompiledPage> {
        pages
            .iter()
            .enumerate()
            .map(|(page_index, idx)| CompiledPage {
                page_index,
                slots: idx
                    .iter()
                    .enumerate()
                    .map(|(slot, &original_index)| SlotAssignment {
                        original_index,
                        page_index,
                        slot,
                        embedded: true,
                        placement: None,
                    })
                    .collect(),
            })
            .collect()
    }

    fn block_in_slot(slot: usize, text: &str, confidence: f32) -> TextBlock {
        let (top, bottom) = slot_span_normalized(slot);
        let mid = (top + bottom) / 2.0;
        TextBlock {
            text: text.into(),
            top: mid - 0.01,
            bottom: mid + 0.01,
            confidence,
        }
    }

    fn page(n: usize, text: &str, blocks: Vec<TextBlock>) -> EnhancedPage {
        EnhancedPage {
            page_number: n,
            text: text.into(),
            confidence: 0.8,
            blocks,
        }
    }

    #[test]
    fn page_order_yields_one_record_per_page() {
        let cropped: Vec<_> = (0..5).map(|i| cropped(i, "q")).collect();
        let pages = compiled(&[&[0, 1, 2, 3], &[4]]);
        let enhanced = vec![page(1, "first page", vec![]), page(2, "second", vec![])];
        let out = map_entities(&pages, &cropped, &enhanced, MappingMode::PageOrder);
        let got: Vec<_> = out
            .entities
            .iter()
            .map(|e| (e.original_index, e.stage2_page_number))
            .collect();
        assert_eq!(got, vec![(0, 1), (4, 2)]);
        assert_eq!(out.entities[0].text_length_improvement, 10 - 1);
        assert!(out.skipped.is_empty());
    }

    #[test]
    fn slot_layout_splits_by_position() {
        let cropped: Vec<_> = (0..3).map(|i| cropped(i, "orig")).collect();
        let pages = compiled(&[&[0, 1, 2]]);
        let enhanced = vec![page(
            1,
            "ignored",
            vec![
                block_in_slot(0, "x + 1 = 2", 0.9),
                block_in_slot(2, "∫ f(x) dx", 0.6),
                block_in_slot(0, "x = 1", 0.7),
                block_in_slot(1, "y = 3", 0.4),
                // Below the last cell: nearest owner is slot 2.
                TextBlock {
                    text: "footer".into(),
                    top: 0.985,
                    bottom: 0.995,
                    confidence: 0.5,
                },
            ],
        )];
        let out = map_entities(&pages, &cropped, &enhanced, MappingMode::SlotLayout);
        assert_eq!(out.entities.len(), 3);
        assert_eq!(out.entities[0].enhanced_text, "x + 1 = 2\nx = 1");
        assert!((out.entities[0].stage2_confidence - 0.8).abs() < 1e-6);
        assert_eq!(out.entities[1].enhanced_text, "y = 3");
        assert!((out.entities[1].stage2_confidence - 0.4).abs() < 1e-6);
        assert_eq!(out.entities[2].enhanced_text, "∫ f(x) dx\nfooter");
        assert_eq!(out.entities[2].stage2_slot, 2);
        assert!(out.entities.iter().all(|e| !e.best_effort));
    }

    #[test]
    fn block_straddling_two_cells_is_split_best_effort() {
        let cropped: Vec<_> = vec![cropped(0, "Q1"), cropped(1, "Q2")];
        let pages = compiled(&[&[0, 1]]);
        let (top, _) = slot_span_normalized(0);
        let (second_top, second_bottom) = slot_span_normalized(1);
        let merged = TextBlock {
            text: "Q1 text\nQ2 text".into(),
            top,
            bottom: (second_top + second_bottom) / 2.0,
            confidence: 0.9,
        };
        let enhanced = vec![page(1, "Q1 text\nQ2 text", vec![merged])];
        let out = map_entities(&pages, &cropped, &enhanced, MappingMode::SlotLayout);
        let got: Vec<_> = out
            .entities
            .iter()
            .map(|e| (e.original_index, e.enhanced_text.as_str(), e.best_effort))
            .collect();
        assert_eq!(got, vec![(0, "Q1 text", true), (1, "Q2 text", true)]);
    }

    #[test]
    fn owner_without_blocks_makes_page_best_effort() {
        let cropped: Vec<_> = (0..3).map(|i| cropped(i, "q")).collect();
        let pages = compiled(&[&[0, 1, 2]]);
        let enhanced = vec![page(
            1,
            "",
            vec![block_in_slot(0, "A", 0.9), block_in_slot(2, "B C", 0.9)],
        )];
        let out = map_entities(&pages, &cropped, &enhanced, MappingMode::SlotLayout);
        assert!(out.entities.iter().all(|e| e.best_effort));
        let texts: Vec<_> = out.entities.iter().map(|e| e.enhanced_text.as_str()).collect();
        assert_eq!(texts, vec!["A", "B C", ""]);
        assert_eq!(out.entities[0].stage2_confidence, 0.8);
    }

    #[test]
    fn empty_slot_does_not_shift_owners() {
        let cropped: Vec<_> = vec![cropped(0, "a"), cropped(2, "c")];
        let mut pages = compiled(&[&[0, 1, 2]]);
        pages[0].slots[1].embedded = false;
        let enhanced = vec![page(
            1,
            "",
            vec![block_in_slot(0, "A", 0.9), block_in_slot(2, "C", 0.9)],
        )];
        let out = map_entities(&pages, &cropped, &enhanced, MappingMode::SlotLayout);
        let got: Vec<_> = out
            .entities
            .iter()
            .map(|e| (e.original_index, e.stage2_slot, e.enhanced_text.as_str()))
            .collect();
        assert_eq!(got, vec![(0, 0, "A"), (2, 2, "C")]);
    }

    #[test]
    fn without_blocks_falls_back_to_segments() {
        let cropped: Vec<_> = (0..2).map(|i| cropped(i, "q")).collect();
        let pages = compiled(&[&[0, 1]]);
        let enhanced = vec![page(1, "Q1 alpha\n\nQ2 beta", vec![])];
        let out = map_entities(&pages, &cropped, &enhanced, MappingMode::SlotLayout);
        assert_eq!(out.entities[0].enhanced_text, "Q1 alpha");
        assert_eq!(out.entities[1].enhanced_text, "Q2 beta");
        assert!(out.entities.iter().all(|e| e.best_effort));
    }

    #[test]
    fn single_owner_takes_whole_page() {
        let cropped = vec![cropped(7, "old")];
        let pages = compiled(&[&[7]]);
        let enhanced = vec![page(1, " whole text \n", vec![block_in_slot(3, "stray", 0.1)])];
        let out = map_entities(&pages, &cropped, &enhanced, MappingMode::SlotLayout);
        assert_eq!(out.entities[0].enhanced_text, "whole text");
        assert_eq!(out.entities[0].stage2_confidence, 0.8);
    }

    #[test]
    fn extra_enhanced_pages_are_skipped() {
        let cropped = vec![cropped(0, "q")];
        let pages = compiled(&[&[0]]);
        let enhanced = vec![page(1, "one", vec![]), page(2, "two", vec![])];
        let out = map_entities(&pages, &cropped, &enhanced, MappingMode::PageOrder);
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.skipped, vec![ItemError::MappingSkipped { page_number: 2 }]);
    }
}
