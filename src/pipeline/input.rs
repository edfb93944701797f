//! Input decoding: base64 request payload → validated PDF bytes.
//!
//! The signature check runs before anything touches pdfium or the OCR
//! service, so a bad upload fails fast with a meaningful error instead of a
//! pdfium parse error or a billed OCR call.

use crate::error::PipelineError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Pipeline entry-point payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineInput {
    pub pdf_base64: String,
    pub filename: String,
}

impl PipelineInput {
    /// Wrap raw PDF bytes.
    pub fn from_bytes(bytes: &[u8], filename: impl Into<String>) -> Self {
        Self {
            pdf_base64: STANDARD.encode(bytes),
            filename: filename.into(),
        }
    }
}

/// Decode the payload and check the PDF signature.
pub fn decode_input(input: &PipelineInput) -> Result<Vec<u8>, PipelineError> {
    // Tolerate line-wrapped base64 and data-URI prefixes from browser uploads.
    let payload = input
        .pdf_base64
        .split_once("base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(&input.pdf_base64);
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    if compact.is_empty() {
        return Err(PipelineError::InvalidInput {
            reason: "pdfBase64 is empty".to_string(),
        });
    }

    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| PipelineError::InvalidInput {
            reason: format!("pdfBase64 is not valid base64: {e}"),
        })?;

    validate_pdf_signature(&bytes)?;
    debug!("Decoded '{}': {} bytes", input.filename, bytes.len());
    Ok(bytes)
}

/// Fail with [`PipelineError::NotAPdf`] unless `bytes` starts with `%PDF`.
pub fn validate_pdf_signature(bytes: &[u8]) -> Result<(), PipelineError> {
    if bytes.len() < PDF_MAGIC.len() || &bytes[..PDF_MAGIC.len()] != PDF_MAGIC {
        return Err(PipelineError::NotAPdf {
            magic: bytes.iter().take(PDF_MAGIC.len()).copied().collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_pdf_bytes() {
        let input = PipelineInput::from_bytes(b"%PDF-1.7\n...", "paper.pdf");
        assert_eq!(decode_input(&input).unwrap(), b"%PDF-1.7\n...");
    }

    #[test]
    fn accepts_wrapped_and_data_uri_payloads() {
        let b64 = STANDARD.encode(b"%PDF-1.4 body");
        let (a, b) = b64.split_at(6);
        let input = PipelineInput {
            pdf_base64: format!("data:application/pdf;base64,{a}\n{b}\n"),
            filename: "scan.pdf".into(),
        };
        assert_eq!(decode_input(&input).unwrap(), b"%PDF-1.4 body");
    }

    #[test]
    fn rejects_non_pdf() {
        let input = PipelineInput::from_bytes(b"\x89PNG\r\n", "photo.png");
        match decode_input(&input) {
            Err(PipelineError::NotAPdf { magic }) => assert_eq!(magic, b"\x89PNG"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_and_garbage() {
        let empty = PipelineInput {
            pdf_base64: "  ".into(),
            filename: "x.pdf".into(),
        };
        assert!(matches!(
            decode_input(&empty),
            Err(PipelineError::InvalidInput { .. })
        ));

        let garbage = PipelineInput {
            pdf_base64: "not base64 at all!".into(),
            filename: "x.pdf".into(),
        };
        assert!(matches!(
            decode_input(&garbage),
            Err(PipelineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn short_input_is_not_a_pdf() {
        assert!(matches!(
            validate_pdf_signature(b"%P"),
            Err(PipelineError::NotAPdf { .. })
        ));
    }
}
