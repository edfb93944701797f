//! Pixel-space geometry: normalized polygons → clamped crop rectangles.
//!
//! The OCR service reports outlines as fractions of the page. Every crop
//! rectangle produced here is clamped so that
//! `0 ≤ left ≤ right ≤ page_width` and `0 ≤ top ≤ bottom ≤ page_height`;
//! anything that collapses to zero area is rejected rather than clamped
//! into a 0×0 image.

use crate::model::{Entity, Vertex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("invalid geometry: {detail}")]
    InvalidGeometry { detail: String },

    #[error("no question/answer entity has a usable region on this page")]
    NoRegionEntities,
}

/// An axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn right(&self) -> u32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.top + self.height
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &PixelRect) -> PixelRect {
        let left = self.left.min(other.left);
        let top = self.top.min(other.top);
        PixelRect {
            left,
            top,
            width: self.right().max(other.right()) - left,
            height: self.bottom().max(other.bottom()) - top,
        }
    }

    /// Grow by `padding` on every side, clamped to the page.
    pub fn expand(&self, padding: u32, page_width: u32, page_height: u32) -> PixelRect {
        let left = self.left.saturating_sub(padding);
        let top = self.top.saturating_sub(padding);
        let right = self.right().saturating_add(padding).min(page_width);
        let bottom = self.bottom().saturating_add(padding).min(page_height);
        PixelRect {
            left,
            top,
            width: right.saturating_sub(left),
            height: bottom.saturating_sub(top),
        }
    }
}

/// Convert a normalized polygon to a clamped pixel rectangle.
///
/// Min edges round down and max edges round up so a region never loses a
/// partially covered pixel. Non-finite vertices are ignored.
pub fn to_pixel_rect(
    polygon: &[Vertex],
    page_width: u32,
    page_height: u32,
) -> Result<PixelRect, GeometryError> {
    let points: Vec<&Vertex> = polygon
        .iter()
        .filter(|v| v.x.is_finite() && v.y.is_finite())
        .collect();
    if points.is_empty() {
        return Err(GeometryError::InvalidGeometry {
            detail: "polygon has no usable vertices".to_string(),
        });
    }

    let (w, h) = (page_width as f64, page_height as f64);
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for v in points {
        min_x = min_x.min(v.x * w);
        min_y = min_y.min(v.y * h);
        max_x = max_x.max(v.x * w);
        max_y = max_y.max(v.y * h);
    }

    let left = min_x.floor().max(0.0);
    let top = min_y.floor().max(0.0);
    let right = max_x.ceil().min(w);
    let bottom = max_y.ceil().min(h);

    let width = right - left;
    let height = bottom - top;
    if width <= 0.0 || height <= 0.0 {
        return Err(GeometryError::InvalidGeometry {
            detail: format!("rectangle collapses to {width}x{height} px"),
        });
    }

    Ok(PixelRect {
        left: left as u32,
        top: top as u32,
        width: width as u32,
        height: height as u32,
    })
}

/// Union of all question/answer regions on `page_index`, padded and clamped.
///
/// Image entities never contribute: diagrams often sit far from the text
/// and would drag OCR-irrelevant pixels into the region.
pub fn master_region(
    entities: &[Entity],
    page_index: usize,
    page_width: u32,
    page_height: u32,
    padding: u32,
) -> Result<PixelRect, GeometryError> {
    let union = entities
        .iter()
        .filter(|e| e.entity_type.is_qa())
        .flat_map(|e| e.bounding_polygon.iter())
        .filter(|r| r.page_index == page_index)
        .filter_map(|r| to_pixel_rect(&r.vertices, page_width, page_height).ok())
        .reduce(|acc, rect| acc.union(&rect))
        .ok_or(GeometryError::NoRegionEntities)?;

    let region = union.expand(padding, page_width, page_height);
    debug!("Master region for page {}: {:?}", page_index + 1, region);
    Ok(region)
}
