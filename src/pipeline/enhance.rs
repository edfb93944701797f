//! Enhancement: the compiled PDF through the premium OCR tier.
//!
//! One call covers every compiled page. Math/formula and selection-mark
//! recognition are switched on; if the premium tier fails the shared
//! downgrade helper retries once at basic. A total failure is returned to
//! the orchestrator as [`OcrOutcome::Failure`], never swallowed here.

use crate::config::PipelineConfig;
use crate::model::{EnhancedPage, TextBlock};
use crate::ocr::{
    run_with_downgrade, OcrDocument, OcrOutcome, OcrRequest, OcrService, OcrTier, ProcessOptions,
};
use tracing::info;

/// Per-page enhanced text, in compiled page order.
#[derive(Debug, Clone, PartialEq)]
pub struct Enhancement {
    pub pages: Vec<EnhancedPage>,
}

impl Enhancement {
    pub fn total_chars(&self) -> usize {
        self.pages.iter().map(|p| p.text.chars().count()).sum()
    }
}

/// Run premium OCR over the compiled PDF.
pub async fn enhance(
    service: &dyn OcrService,
    compiled_pdf: &[u8],
    config: &PipelineConfig,
) -> OcrOutcome<Enhancement> {
    let request = OcrRequest::pdf(
        compiled_pdf.to_vec(),
        OcrTier::Premium,
        ProcessOptions::premium(),
    );

    let outcome = run_with_downgrade(service, &request, config.ocr_timeout())
        .await
        .map(to_enhancement);

    if let OcrOutcome::Success { tier, data } = &outcome {
        info!(
            "Enhanced {} compiled pages via {} tier ({} chars)",
            data.pages.len(),
            tier,
            data.total_chars()
        );
    }
    outcome
}

fn to_enhancement(document: OcrDocument) -> Enhancement {
    let pages = document
        .pages
        .into_iter()
        .enumerate()
        .map(|(i, page)| {
            let blocks = page
                .blocks
                .iter()
                .filter_map(|b| {
                    let (top, bottom) = b.vertical_span()?;
                    Some(TextBlock {
                        text: b.text.clone(),
                        top,
                        bottom,
                        confidence: b.confidence,
                    })
                })
                .collect();
            EnhancedPage {
                page_number: if page.page_number > 0 {
                    page.page_number
                } else {
                    i + 1
                },
                text: page.text,
                confidence: page.confidence,
                blocks,
            }
        })
        .collect();
    Enhancement { pages }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::{OcrBlock, OcrError, OcrPage, Vertex};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails the premium tier, answers at basic.
    struct PremiumDown {
        seen: Mutex<Vec<(OcrTier, ProcessOptions)>>,
    }

    #[async_trait]
    impl OcrService for PremiumDown {
        async fn process(&self, request: &OcrRequest) -> Result<OcrDocument, OcrError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.tier, request.options));
            if request.tier == OcrTier::Premium {
                return Err(OcrError::Http {
                    status: 429,
                    body: "quota".into(),
                });
            }
            Ok(OcrDocument {
                text: "x = 2".into(),
                pages: vec![OcrPage {
                    page_number: 1,
                    text: "x = 2".into(),
                    confidence: 0.7,
                    blocks: vec![
                        OcrBlock {
                            text: "x = 2".into(),
                            polygon: vec![Vertex::new(0.1, 0.05), Vertex::new(0.9, 0.1)],
                            confidence: 0.7,
                        },
                        OcrBlock::default(),
                    ],
                    ..Default::default()
                }],
                entities: vec![],
            })
        }
    }

    #[tokio::test]
    async fn premium_failure_downgrades_to_basic() {
        let svc = PremiumDown {
            seen: Mutex::new(vec![]),
        };
        let outcome = enhance(&svc, b"%PDF", &PipelineConfig::default()).await;
        match outcome {
            OcrOutcome::Success { tier, data } => {
                assert_eq!(tier, OcrTier::Basic);
                assert_eq!(data.pages.len(), 1);
                assert_eq!(data.pages[0].blocks.len(), 1, "blocks without geometry are dropped");
                assert_eq!(data.pages[0].blocks[0].top, 0.05);
            }
            OcrOutcome::Failure { .. } => panic!("expected success"),
        }

        let seen = svc.seen.lock().unwrap();
        assert_eq!(seen[0], (OcrTier::Premium, ProcessOptions::premium()));
        assert!(seen[0].1.math_ocr && seen[0].1.selection_marks);
        assert_eq!(seen[1], (OcrTier::Basic, ProcessOptions::default()));
    }
}
