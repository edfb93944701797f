//! PDF rasterisation: every page of the input to a `DynamicImage` via pdfium.
//!
//! pdfium keeps thread-local state and is CPU-bound, so all of the work
//! happens inside `tokio::task::spawn_blocking`.
//!
//! Pages are capped at `max_rendered_pixels` on the longest edge rather than
//! rendered at a fixed DPI; exam scans arrive at any physical size and a
//! fixed DPI on an A3 sheet blows the memory budget.

use crate::error::{ItemError, PipelineError};
use crate::model::RasterPage;
use crate::pipeline::input::validate_pdf_signature;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Pages that rendered plus the ones that did not.
#[derive(Debug, Default)]
pub struct RasterOutput {
    /// Ascending by `index`; failed pages are absent.
    pub pages: Vec<RasterPage>,
    pub failures: Vec<ItemError>,
}

/// Turns PDF bytes into page images.
///
/// Fails only when the input is not a PDF, cannot be parsed, or not a single
/// page renders. Individual page failures are reported in
/// [`RasterOutput::failures`].
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, pdf: Arc<Vec<u8>>) -> Result<RasterOutput, PipelineError>;
}

/// The production [`Rasterizer`], backed by a pdfium shared library.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    max_rendered_pixels: u32,
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    pub fn new(max_rendered_pixels: u32) -> Self {
        Self {
            max_rendered_pixels,
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    /// Bind to the library at `path` instead of searching for one.
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(&self, pdf: Arc<Vec<u8>>) -> Result<RasterOutput, PipelineError> {
        validate_pdf_signature(&pdf)?;

        let max_pixels = self.max_rendered_pixels;
        let library_path = self.library_path.clone();

        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium(library_path.as_ref())?;
            render_all_blocking(&pdfium, &pdf, max_pixels)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Explicit path first, then next to the binary, then the system library.
fn bind_pdfium(library_path: Option<&PathBuf>) -> Result<Pdfium, PipelineError> {
    let bindings = match library_path {
        Some(path) => Pdfium::bind_to_library(path)
            .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{}: {:?}", path.display(), e)))?,
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| PipelineError::PdfiumBindingFailed(format!("{:?}", e)))?,
    };
    Ok(Pdfium::new(bindings))
}

fn render_all_blocking(
    pdfium: &Pdfium,
    pdf: &[u8],
    max_pixels: u32,
) -> Result<RasterOutput, PipelineError> {
    let document = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| PipelineError::CorruptPdf {
            detail: format!("{:?}", e),
        })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut output = RasterOutput::default();

    for idx in 0..total_pages {
        match render_page(&pages, idx, &render_config) {
            Ok(image) => {
                debug!(
                    "Rendered page {} → {}x{} px",
                    idx + 1,
                    image.width(),
                    image.height()
                );
                output.pages.push(RasterPage {
                    index: idx,
                    pixel_width: image.width(),
                    pixel_height: image.height(),
                    image,
                });
            }
            Err(e) => {
                warn!("Page {} failed to render: {:?}", idx + 1, e);
                output.failures.push(ItemError::RenderFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                });
            }
        }
    }

    if output.pages.is_empty() {
        return Err(PipelineError::RasterisationFailed {
            detail: match output.failures.first() {
                Some(first) => first.to_string(),
                None => "document has no pages".to_string(),
            },
        });
    }

    Ok(output)
}

fn render_page(
    pages: &PdfPages,
    idx: usize,
    render_config: &PdfRenderConfig,
) -> Result<image::DynamicImage, PdfiumError> {
    let page = pages.get(idx as u16)?;
    let bitmap = page.render_with_config(render_config)?;
    Ok(bitmap.as_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_pdf_is_rejected_before_binding() {
        // The signature check must not need a pdfium library.
        let r = PdfiumRasterizer::new(2000).with_library_path("/nonexistent/libpdfium.so");
        let err = r
            .rasterize(Arc::new(b"GIF89a....".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotAPdf { .. }));
    }

    #[tokio::test]
    async fn missing_library_is_a_binding_error() {
        let r = PdfiumRasterizer::new(2000).with_library_path("/nonexistent/libpdfium.so");
        let err = r
            .rasterize(Arc::new(b"%PDF-1.7\n%%EOF".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PdfiumBindingFailed(_)));
    }
}
