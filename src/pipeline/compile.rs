//! Compilation: cropped entities → one compact Letter-size PDF.
//!
//! Crops are packed four to a page in a single column, in entity order, so
//! the premium OCR pass is billed per four entities instead of per source
//! page. Each cell is `(792 - 5×15) / 4` points high with 15 pt padding all
//! round; images are scaled (up or down) to fit the cell with their aspect
//! ratio intact and centred in it.
//!
//! The `originalIndex → (pageIndex, slot)` table produced here is the only
//! link between an entity and the text recognised on the compiled page, so
//! it is returned alongside the PDF bytes rather than reconstructed later.
//!
//! PDF objects are written with `lopdf`. PNG crops are re-encoded as raw
//! RGB behind a `FlateDecode` filter; JPEG bytes are embedded as-is with
//! `DCTDecode`, with the colour space taken from the frame's component
//! count.

use crate::error::ItemError;
use crate::model::{CompiledPage, CroppedEntity, Placement, SlotAssignment};
use crate::pipeline::encode::{detect_kind, jpeg_header, ImageKind};
use flate2::{write::ZlibEncoder, Compression};
use image::ImageFormat;
use lopdf::{dictionary, Dictionary, Document, Object, Stream};
use std::io::Write;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const PAGE_WIDTH: f64 = 612.0;
pub const PAGE_HEIGHT: f64 = 792.0;
pub const PADDING: f64 = 15.0;
pub const SLOTS_PER_PAGE: usize = 4;

pub const CELL_WIDTH: f64 = PAGE_WIDTH - 2.0 * PADDING;
pub const CELL_HEIGHT: f64 =
    (PAGE_HEIGHT - (SLOTS_PER_PAGE as f64 + 1.0) * PADDING) / SLOTS_PER_PAGE as f64;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("nothing to compile")]
    Empty,

    #[error("PDF serialisation failed: {0}")]
    Serialize(String),
}

/// The compiled PDF and its slot table.
#[derive(Debug, Clone)]
pub struct CompiledDocument {
    pub pdf_bytes: Vec<u8>,
    pub pages: Vec<CompiledPage>,
    /// Slots left empty because their image could not be embedded.
    pub failures: Vec<ItemError>,
}

impl CompiledDocument {
    pub fn embedded_count(&self) -> usize {
        self.pages.iter().map(|p| p.embedded_slots().count()).sum()
    }
}

/// Partition `0..n` into consecutive groups of at most four.
pub fn batch_layout(n: usize) -> Vec<Vec<usize>> {
    (0..n)
        .collect::<Vec<_>>()
        .chunks(SLOTS_PER_PAGE)
        .map(|c| c.to_vec())
        .collect()
}

/// The cell for `slot`, in PDF points with the origin bottom-left.
pub fn cell_rect(slot: usize) -> Placement {
    let top = PADDING + slot as f64 * (CELL_HEIGHT + PADDING);
    Placement {
        x: PADDING,
        y: PAGE_HEIGHT - top - CELL_HEIGHT,
        width: CELL_WIDTH,
        height: CELL_HEIGHT,
    }
}

/// Vertical extent of `slot` as fractions of the page height, measured from
/// the top, the same convention the OCR service uses for block polygons.
pub fn slot_span_normalized(slot: usize) -> (f64, f64) {
    let top = PADDING + slot as f64 * (CELL_HEIGHT + PADDING);
    (top / PAGE_HEIGHT, (top + CELL_HEIGHT) / PAGE_HEIGHT)
}

/// Scale an `img_width × img_height` image into `slot`'s cell, keeping its
/// aspect ratio, and centre it.
pub fn fit_in_cell(img_width: u32, img_height: u32, slot: usize) -> Placement {
    let cell = cell_rect(slot);
    let (w, h) = (img_width.max(1) as f64, img_height.max(1) as f64);
    let scale = (cell.width / w).min(cell.height / h);
    let (width, height) = (w * scale, h * scale);
    Placement {
        x: cell.x + (cell.width - width) / 2.0,
        y: cell.y + (cell.height - height) / 2.0,
        width,
        height,
    }
}

/// Build the compiled PDF.
///
/// An image that cannot be embedded leaves its cell empty and is reported
/// in [`CompiledDocument::failures`]; the page is still emitted and the
/// slot keeps its position.
pub fn compile(cropped: &[CroppedEntity]) -> Result<CompiledDocument, CompileError> {
    if cropped.is_empty() {
        return Err(CompileError::Empty);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    let mut pages = Vec::new();
    let mut failures = Vec::new();

    for (page_index, group) in batch_layout(cropped.len()).iter().enumerate() {
        let mut content = String::new();
        let mut xobjects = Dictionary::new();
        let mut slots = Vec::with_capacity(group.len());

        for (slot, &i) in group.iter().enumerate() {
            let item = &cropped[i];
            match prepare_image(&item.image_bytes) {
                Ok(img) => {
                    let placement = fit_in_cell(img.width, img.height, slot);
                    let name = format!("Im{}", slot);
                    let image_id = doc.add_object(Stream::new(img.dict, img.data));
                    xobjects.set(name.clone(), image_id);
                    content.push_str(&format!(
                        "q {:.4} 0 0 {:.4} {:.4} {:.4} cm /{} Do Q\n",
                        placement.width, placement.height, placement.x, placement.y, name
                    ));
                    debug!(
                        "Entity {} → page {} slot {} ({:.1}x{:.1} pt)",
                        item.original_index, page_index, slot, placement.width, placement.height
                    );
                    slots.push(SlotAssignment {
                        original_index: item.original_index,
                        page_index,
                        slot,
                        embedded: true,
                        placement: Some(placement),
                    });
                }
                Err(detail) => {
                    let err = ItemError::EncodingUnsupported {
                        original_index: item.original_index,
                        page_index,
                        slot,
                        detail,
                    };
                    warn!("{}", err);
                    failures.push(err);
                    slots.push(SlotAssignment {
                        original_index: item.original_index,
                        page_index,
                        slot,
                        embedded: false,
                        placement: None,
                    });
                }
            }
        }

        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), (PAGE_WIDTH as i64).into(), (PAGE_HEIGHT as i64).into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => xobjects,
            },
        });
        kids.push(page_id.into());
        pages.push(CompiledPage { page_index, slots });
    }

    let page_count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut pdf_bytes = Vec::new();
    doc.save_to(&mut pdf_bytes)
        .map_err(|e| CompileError::Serialize(e.to_string()))?;

    info!(
        "Compiled {} crops into {} pages ({} bytes, {} empty slots)",
        cropped.len(),
        pages.len(),
        pdf_bytes.len(),
        failures.len()
    );

    Ok(CompiledDocument {
        pdf_bytes,
        pages,
        failures,
    })
}

/// An image XObject ready to be added to the document.
struct PreparedImage {
    dict: Dictionary,
    data: Vec<u8>,
    width: u32,
    height: u32,
}

fn prepare_image(bytes: &[u8]) -> Result<PreparedImage, String> {
    match detect_kind(bytes) {
        ImageKind::Jpeg => {
            let header =
                jpeg_header(bytes).ok_or_else(|| "unreadable JPEG: no frame header".to_string())?;
            if header.width == 0 || header.height == 0 {
                return Err(format!(
                    "unreadable JPEG: {}x{} frame",
                    header.width, header.height
                ));
            }
            let color_space = match header.components {
                1 => "DeviceGray",
                3 => "DeviceRGB",
                4 => "DeviceCMYK",
                n => return Err(format!("unsupported JPEG with {} components", n)),
            };
            let mut dict = image_dict(header.width, header.height, color_space, "DCTDecode");
            if header.components == 4 && header.adobe {
                let inverted: Vec<Object> = (0..4)
                    .flat_map(|_| [Object::Integer(1), Object::Integer(0)])
                    .collect();
                dict.set("Decode", inverted);
            }
            Ok(PreparedImage {
                dict,
                data: bytes.to_vec(),
                width: header.width,
                height: header.height,
            })
        }
        ImageKind::Png => {
            let img = image::load_from_memory_with_format(bytes, ImageFormat::Png)
                .map_err(|e| format!("unreadable PNG: {}", e))?;
            let rgb = img.to_rgb8();
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(rgb.as_raw())
                .map_err(|e| format!("deflate failed: {}", e))?;
            let data = encoder
                .finish()
                .map_err(|e| format!("deflate failed: {}", e))?;
            Ok(PreparedImage {
                dict: image_dict(rgb.width(), rgb.height(), "DeviceRGB", "FlateDecode"),
                data,
                width: rgb.width(),
                height: rgb.height(),
            })
        }
    }
}

fn image_dict(width: u32, height: u32, color_space: &str, filter: &str) -> Dictionary {
    dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8i64,
        "Filter" => filter,
    }
}
