//! Cropping: pixel-exact sub-images of question/answer entities.
//!
//! Every crop is independent and purely in-memory, so `crop_all` fans the
//! entities out over a bounded pool of blocking tasks. Results come back in
//! entity order regardless of which worker finishes first.

use crate::cancel::CancelFlag;
use crate::error::ItemError;
use crate::model::{CroppedEntity, Entity, RasterPage, Vertex};
use crate::pipeline::encode::encode_png;
use crate::pipeline::geometry::{to_pixel_rect, GeometryError};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt};
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CropError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Everything `crop_all` produced.
#[derive(Debug, Default)]
pub struct CropOutcome {
    /// In `original_index` order.
    pub cropped: Vec<CroppedEntity>,
    pub failures: Vec<ItemError>,
    /// Cancellation was observed; `cropped` holds what finished before it.
    pub cancelled: bool,
}

/// Crop `polygon` out of `page` and encode it as PNG.
pub fn crop(page: &RasterPage, polygon: &[Vertex]) -> Result<Vec<u8>, CropError> {
    let region = crop_region(page, polygon)?;
    Ok(encode_png(&region)?)
}

fn crop_region(page: &RasterPage, polygon: &[Vertex]) -> Result<DynamicImage, GeometryError> {
    let rect = to_pixel_rect(polygon, page.pixel_width, page.pixel_height)?;
    debug!("Page {} crop {:?}", page.index + 1, rect);
    Ok(page
        .image
        .crop_imm(rect.left, rect.top, rect.width, rect.height))
}

/// Crop one entity.
///
/// An entity with several page regions yields one image with the regions
/// stacked top to bottom in reference order.
pub fn crop_entity(
    pages: &[RasterPage],
    original_index: usize,
    entity: &Entity,
) -> Result<CroppedEntity, ItemError> {
    if entity.bounding_polygon.is_empty() {
        return Err(ItemError::InvalidGeometry {
            original_index,
            detail: "entity has no bounding polygon".to_string(),
        });
    }

    let mut parts = Vec::with_capacity(entity.bounding_polygon.len());
    for region in &entity.bounding_polygon {
        let page = pages
            .iter()
            .find(|p| p.index == region.page_index)
            .ok_or(ItemError::PageUnavailable {
                original_index,
                page: region.page_index + 1,
            })?;
        let part =
            crop_region(page, &region.vertices).map_err(|e| ItemError::InvalidGeometry {
                original_index,
                detail: e.to_string(),
            })?;
        parts.push(part);
    }

    let image = if parts.len() == 1 {
        parts.remove(0)
    } else {
        stack_vertically(&parts)
    };

    let image_bytes = encode_png(&image).map_err(|e| ItemError::CropEncodingFailed {
        original_index,
        detail: e.to_string(),
    })?;

    Ok(CroppedEntity {
        original_index,
        entity: entity.clone(),
        image_bytes,
        width: image.width(),
        height: image.height(),
    })
}

/// Left-aligned on a white canvas as wide as the widest part.
fn stack_vertically(parts: &[DynamicImage]) -> DynamicImage {
    let width = parts.iter().map(|p| p.width()).max().unwrap_or(1);
    let height = parts.iter().map(|p| p.height()).sum::<u32>().max(1);
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

    let mut y = 0i64;
    for part in parts {
        image::imageops::replace(&mut canvas, &part.to_rgb8(), 0, y);
        y += part.height() as i64;
    }
    DynamicImage::ImageRgb8(canvas)
}

/// Crop every question/answer entity on a pool of `concurrency` blocking tasks.
///
/// Image entities are skipped. A failed crop is recorded and excluded; it
/// never aborts the batch. Once `cancel` fires no new crop starts, and the
/// crops already finished are kept.
pub async fn crop_all(
    pages: Arc<Vec<RasterPage>>,
    entities: &[Entity],
    concurrency: usize,
    cancel: &CancelFlag,
    progress: Option<&ProgressCallback>,
) -> CropOutcome {
    let jobs: Vec<(usize, Entity)> = entities
        .iter()
        .enumerate()
        .filter(|(_, e)| e.entity_type.is_qa())
        .map(|(i, e)| (i, e.clone()))
        .collect();
    let total = jobs.len();
    let done = Arc::new(AtomicUsize::new(0));

    let results: Vec<Option<Result<CroppedEntity, ItemError>>> =
        stream::iter(jobs.into_iter().map(|(original_index, entity)| {
            let pages = Arc::clone(&pages);
            let cancel = cancel.clone();
            let progress = progress.cloned();
            let done = Arc::clone(&done);
            async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let joined = tokio::task::spawn_blocking(move || {
                    crop_entity(&pages, original_index, &entity)
                })
                .await;
                let result = joined.unwrap_or_else(|e| {
                    Err(ItemError::CropEncodingFailed {
                        original_index,
                        detail: format!("crop task panicked: {}", e),
                    })
                });
                if let (Ok(_), Some(cb)) = (&result, &progress) {
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    cb.on_entity_cropped(original_index, n, total);
                }
                Some(result)
            }
        }))
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut outcome = CropOutcome::default();
    for result in results {
        match result {
            Some(Ok(cropped)) => outcome.cropped.push(cropped),
            Some(Err(e)) => {
                warn!("{}", e);
                outcome.failures.push(e);
            }
            None => outcome.cancelled = true,
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, PageRegion};

    fn page(index: usize, w: u32, h: u32) -> RasterPage {
        let mut img = RgbImage::from_pixel(w, h, Rgb([255, 255, 255]));
        // A black mark in the top-left quadrant.
        for y in 0..h / 2 {
            for x in 0..w / 2 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        RasterPage {
            index,
            pixel_width: w,
            pixel_height: h,
            image: DynamicImage::ImageRgb8(img),
        }
    }

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Vertex> {
        vec![
            Vertex::new(x0, y0),
            Vertex::new(x1, y0),
            Vertex::new(x1, y1),
            Vertex::new(x0, y1),
        ]
    }

    fn entity(entity_type: EntityType, regions: Vec<(usize, Vec<Vertex>)>) -> Entity {
        Entity {
            entity_type,
            label: "question".into(),
            page_number: regions.first().map_or(1, |r| r.0 + 1),
            text: "text".into(),
            bounding_polygon: regions
                .into_iter()
                .map(|(page_index, vertices)| PageRegion {
                    page_index,
                    vertices,
                })
                .collect(),
            confidence: 0.9,
            heuristic: false,
        }
    }

    #[test]
    fn crop_is_pixel_exact() {
        let p = page(0, 200, 100);
        let png = crop(&p, &square(0.0, 0.0, 0.5, 0.5)).unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (100, 50));
        assert!(img.pixels().all(|px| *px == Rgb([0, 0, 0])));
    }

    #[test]
    fn degenerate_polygon_is_invalid_geometry() {
        let p = page(0, 200, 100);
        let err = crop(&p, &square(0.3, 0.3, 0.3, 0.6)).unwrap_err();
        assert!(matches!(err, CropError::Geometry(GeometryError::InvalidGeometry { .. })));
    }

    #[test]
    fn multi_region_entities_are_stacked() {
        let pages = vec![page(0, 200, 100), page(1, 200, 100)];
        let e = entity(
            EntityType::Question,
            vec![
                (0, square(0.0, 0.8, 1.0, 1.0)),
                (1, square(0.0, 0.0, 0.5, 0.3)),
            ],
        );
        let c = crop_entity(&pages, 3, &e).unwrap();
        assert_eq!(c.original_index, 3);
        assert_eq!((c.width, c.height), (200, 20 + 30));
    }

    #[test]
    fn missing_page_is_reported() {
        let pages = vec![page(0, 100, 100)];
        let e = entity(EntityType::Answer, vec![(4, square(0.0, 0.0, 1.0, 1.0))]);
        assert_eq!(
            crop_entity(&pages, 1, &e).unwrap_err(),
            ItemError::PageUnavailable {
                original_index: 1,
                page: 5
            }
        );
    }

    #[tokio::test]
    async fn crop_all_skips_images_and_keeps_order() {
        let pages = Arc::new(vec![page(0, 100, 100)]);
        let entities = vec![
            entity(EntityType::Question, vec![(0, square(0.0, 0.0, 0.5, 0.5))]),
            entity(EntityType::Image, vec![(0, square(0.5, 0.5, 1.0, 1.0))]),
            entity(EntityType::Answer, vec![(0, square(0.2, 0.2, 0.2, 0.9))]),
            entity(EntityType::Answer, vec![(0, square(0.0, 0.5, 1.0, 1.0))]),
            entity(EntityType::Question, vec![(0, square(0.1, 0.1, 0.9, 0.9))]),
        ];
        let out = crop_all(pages, &entities, 2, &CancelFlag::new(), None).await;
        let indices: Vec<_> = out.cropped.iter().map(|c| c.original_index).collect();
        assert_eq!(indices, vec![0, 3, 4]);
        assert_eq!(out.failures.len(), 1);
        assert!(!out.cancelled);
    }

    #[tokio::test]
    async fn cancelled_crop_all_starts_nothing() {
        let pages = Arc::new(vec![page(0, 100, 100)]);
        let entities = vec![entity(
            EntityType::Question,
            vec![(0, square(0.0, 0.0, 0.5, 0.5))],
        )];
        let cancel = CancelFlag::new();
        cancel.cancel();
        let out = crop_all(pages, &entities, 4, &cancel, None).await;
        assert!(out.cropped.is_empty());
        assert!(out.cancelled);
    }

    struct CancelOnFirstCrop {
        cancel: CancelFlag,
        events: std::sync::Mutex<Vec<(usize, usize, usize)>>,
    }

    impl crate::progress::PipelineProgressCallback for CancelOnFirstCrop {
        fn on_entity_cropped(&self, original_index: usize, done: usize, total: usize) {
            self.events.lock().unwrap().push((original_index, done, total));
            self.cancel.cancel();
        }
    }

    #[tokio::test]
    async fn cancel_mid_batch_keeps_finished_crops() {
        let pages = Arc::new(vec![page(0, 100, 100)]);
        let entities: Vec<_> = (0..3)
            .map(|_| entity(EntityType::Question, vec![(0, square(0.0, 0.0, 0.5, 0.5))]))
            .collect();
        let cancel = CancelFlag::new();
        let cb = Arc::new(CancelOnFirstCrop {
            cancel: cancel.clone(),
            events: Default::default(),
        });
        let progress: ProgressCallback = cb.clone();

        let out = crop_all(pages, &entities, 1, &cancel, Some(&progress)).await;
        let indices: Vec<_> = out.cropped.iter().map(|c| c.original_index).collect();
        assert_eq!(indices, vec![0]);
        assert!(out.cancelled);
        assert!(out.failures.is_empty());
        assert_eq!(*cb.events.lock().unwrap(), vec![(0, 1, 3)]);
    }
}
