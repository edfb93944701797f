//! Image encoding helpers: lossless PNG for crops, magic-byte sniffing for
//! the compiler, and base64 for the JSON report.
//!
//! Crops are PNG because JPEG artefacts around thin strokes (minus signs,
//! fraction bars, subscripts) measurably hurt the premium OCR pass.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use serde::Serializer;
use std::io::Cursor;
use tracing::debug;

/// Raster formats the compiler knows how to embed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xFF\xD8\xFF";

/// Sniff PNG vs JPEG by magic bytes; anything else is treated as PNG.
pub fn detect_kind(bytes: &[u8]) -> ImageKind {
    if bytes.starts_with(JPEG_MAGIC) {
        ImageKind::Jpeg
    } else {
        if !bytes.starts_with(PNG_MAGIC) {
            debug!("Unrecognised image magic, assuming PNG");
        }
        ImageKind::Png
    }
}

/// Frame parameters of a baseline or progressive JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegHeader {
    pub width: u32,
    pub height: u32,
    /// 1 = gray, 3 = YCbCr/RGB, 4 = CMYK/YCCK.
    pub components: u8,
    /// An Adobe APP14 segment precedes the frame; Adobe CMYK data is stored
    /// inverted.
    pub adobe: bool,
}

/// Walk the marker segments up to the first start-of-frame.
///
/// Returns `None` for anything that is not a well-formed JPEG up to that
/// point.
pub fn jpeg_header(bytes: &[u8]) -> Option<JpegHeader> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut adobe = false;
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        match marker {
            // Fill byte.
            0xFF => {
                pos += 1;
                continue;
            }
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD8 => {
                pos += 2;
                continue;
            }
            // End of image or scan data before any frame header.
            0xD9 | 0xDA => return None,
            _ => {}
        }

        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let segment = bytes.get(pos + 4..pos + 2 + len)?;
        match marker {
            0xEE => adobe |= segment.starts_with(b"Adobe"),
            // SOF0..SOF15 minus DHT, JPG and DAC.
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                if segment.len() < 6 {
                    return None;
                }
                return Some(JpegHeader {
                    height: u16::from_be_bytes([segment[1], segment[2]]) as u32,
                    width: u16::from_be_bytes([segment[3], segment[4]]) as u32,
                    components: segment[5],
                    adobe,
                });
            }
            _ => {}
        }
        pos += 2 + len;
    }
    None
}

/// Encode an image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} crop → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// `serialize_with` helper: bytes as a standard base64 string.
pub fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 4, Rgb([255, 0, 0])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(detect_kind(&png), ImageKind::Png);
        let decoded = image::load_from_memory(&png).expect("valid PNG");
        assert_eq!((decoded.width(), decoded.height()), (10, 4));
    }

    #[test]
    fn detects_jpeg_and_defaults_to_png() {
        assert_eq!(detect_kind(b"\xFF\xD8\xFF\xE0rest"), ImageKind::Jpeg);
        assert_eq!(detect_kind(b"GIF89a"), ImageKind::Png);
        assert_eq!(detect_kind(b""), ImageKind::Png);
    }

    fn encode_jpeg(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    #[test]
    fn jpeg_header_reads_frame() {
        let rgb = encode_jpeg(&DynamicImage::ImageRgb8(RgbImage::from_pixel(
            16,
            8,
            Rgb([1, 2, 3]),
        )));
        assert_eq!(
            jpeg_header(&rgb),
            Some(JpegHeader {
                width: 16,
                height: 8,
                components: 3,
                adobe: false
            })
        );

        let gray = encode_jpeg(&DynamicImage::ImageLuma8(image::GrayImage::new(5, 7)));
        assert_eq!(jpeg_header(&gray).map(|h| h.components), Some(1));
    }

    #[test]
    fn jpeg_header_rejects_garbage() {
        assert_eq!(jpeg_header(b"\x89PNG\r\n\x1a\n"), None);
        assert_eq!(jpeg_header(&[0xFF, 0xD8, 0xFF, 0xD9]), None);
        // Segment length runs past the end.
        assert_eq!(jpeg_header(&[0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x40, 0x08]), None);
    }

    #[test]
    fn base64_serializer() {
        #[derive(serde::Serialize)]
        struct Wrapper {
            #[serde(serialize_with = "serialize_base64")]
            data: Vec<u8>,
        }
        let json = serde_json::to_string(&Wrapper { data: b"hi".to_vec() }).unwrap();
        assert_eq!(json, r#"{"data":"aGk="}"#);
    }
}
