//! Premium → basic downgrade shared by both OCR adapters.
//!
//! Every OCR call gets exactly two chances: once at the requested tier with
//! its flags, then once at the basic tier with no flags. A timeout counts as
//! a failure of that tier. What came back — and from which tier — is
//! reported as an [`OcrOutcome`] so callers decide for themselves whether a
//! total failure is fatal (entity extraction) or merely degrading
//! (enhancement).

use super::{OcrDocument, OcrError, OcrRequest, OcrService, OcrTier};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of an OCR call after the downgrade ladder.
#[derive(Debug, Clone)]
pub enum OcrOutcome<T> {
    /// `tier` is the tier that actually produced `data`.
    Success { tier: OcrTier, data: T },
    /// Every tier failed; `last_error` is the error from the final attempt.
    Failure {
        tried_tiers: Vec<OcrTier>,
        last_error: OcrError,
    },
}

impl<T> OcrOutcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OcrOutcome<U> {
        match self {
            OcrOutcome::Success { tier, data } => OcrOutcome::Success {
                tier,
                data: f(data),
            },
            OcrOutcome::Failure {
                tried_tiers,
                last_error,
            } => OcrOutcome::Failure {
                tried_tiers,
                last_error,
            },
        }
    }
}

/// Call `service`, retrying once at the basic tier on any failure.
pub async fn run_with_downgrade(
    service: &dyn OcrService,
    request: &OcrRequest,
    timeout: Duration,
) -> OcrOutcome<OcrDocument> {
    let attempts = [request.clone(), request.downgraded()];
    let mut tried_tiers = Vec::with_capacity(attempts.len());
    let mut last_error = OcrError::Request("no attempt made".to_string());

    for (attempt, req) in attempts.iter().enumerate() {
        if attempt > 0 {
            warn!(
                "OCR {} tier failed ({}); retrying at basic tier",
                request.tier, last_error
            );
        }
        tried_tiers.push(req.tier);

        let start = Instant::now();
        match call_with_timeout(service, req, timeout).await {
            Ok(doc) => {
                debug!(
                    "OCR {} tier: {} pages, {} entities in {}ms",
                    req.tier,
                    doc.pages.len(),
                    doc.entities.len(),
                    start.elapsed().as_millis()
                );
                return OcrOutcome::Success {
                    tier: req.tier,
                    data: doc,
                };
            }
            Err(e) => last_error = e,
        }
    }

    warn!("OCR failed on every tier: {}", last_error);
    OcrOutcome::Failure {
        tried_tiers,
        last_error,
    }
}

async fn call_with_timeout(
    service: &dyn OcrService,
    request: &OcrRequest,
    timeout: Duration,
) -> Result<OcrDocument, OcrError> {
    match tokio::time::timeout(timeout, service.process(request)).await {
        Ok(result) => result,
        Err(_) => Err(OcrError::Timeout {
            secs: timeout.as_secs(),
        }),
    }
}
