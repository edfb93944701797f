//! Progress-callback trait for per-stage pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the run moves through its stages. The trait is `Send + Sync`
//! because cropping runs on a worker pool and reports failures from there.
//!
//! # Example
//!
//! ```rust
//! use twostage_ocr::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Logger;
//!
//! impl PipelineProgressCallback for Logger {
//!     fn on_stage_complete(&self, stage: Stage, items: usize, elapsed_ms: u64) {
//!         eprintln!("{stage}: {items} items in {elapsed_ms}ms");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(Logger))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::{ItemError, Stage};
use crate::output::PipelineOutcome;
use std::sync::Arc;

/// Called by the orchestrator as the run progresses.
///
/// All methods default to no-ops so callers only override what they need.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called before a stage begins.
    fn on_stage_start(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called after a stage finishes.
    ///
    /// # Arguments
    /// * `items`      — pages, entities or crops the stage produced
    /// * `elapsed_ms` — wall-clock time of the stage
    fn on_stage_complete(&self, stage: Stage, items: usize, elapsed_ms: u64) {
        let _ = (stage, items, elapsed_ms);
    }

    /// Called from the crop workers each time an entity has been cropped.
    ///
    /// # Arguments
    /// * `original_index` — the entity's position in the extractor's output
    /// * `done`           — crops finished so far, this one included
    /// * `total`          — question/answer entities queued for cropping
    fn on_entity_cropped(&self, original_index: usize, done: usize, total: usize) {
        let _ = (original_index, done, total);
    }

    /// Called for every recoverable per-item failure.
    fn on_item_error(&self, stage: Stage, error: &ItemError) {
        let _ = (stage, error);
    }

    /// Called once with the terminal state of a non-fatal run.
    fn on_pipeline_complete(&self, outcome: PipelineOutcome) {
        let _ = outcome;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        started: Mutex<Vec<Stage>>,
        items: AtomicUsize,
        errors: AtomicUsize,
        outcome: Mutex<Option<PipelineOutcome>>,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_stage_start(&self, stage: Stage) {
            self.started.lock().unwrap().push(stage);
        }

        fn on_stage_complete(&self, _stage: Stage, items: usize, _elapsed_ms: u64) {
            self.items.fetch_add(items, Ordering::SeqCst);
        }

        fn on_item_error(&self, _stage: Stage, _error: &ItemError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_pipeline_complete(&self, outcome: PipelineOutcome) {
            *self.outcome.lock().unwrap() = Some(outcome);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_start(Stage::Rasterize);
        cb.on_stage_complete(Stage::Rasterize, 2, 10);
        cb.on_item_error(
            Stage::Crop,
            &ItemError::PageUnavailable {
                original_index: 0,
                page: 3,
            },
        );
        cb.on_pipeline_complete(PipelineOutcome::Full);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_stage_start(Stage::Extract);
        tracker.on_stage_complete(Stage::Extract, 7, 100);
        tracker.on_stage_start(Stage::Crop);
        tracker.on_stage_complete(Stage::Crop, 5, 20);
        tracker.on_item_error(
            Stage::Crop,
            &ItemError::InvalidGeometry {
                original_index: 4,
                detail: "zero width".into(),
            },
        );
        tracker.on_pipeline_complete(PipelineOutcome::Stage1Only);

        assert_eq!(*tracker.started.lock().unwrap(), vec![Stage::Extract, Stage::Crop]);
        assert_eq!(tracker.items.load(Ordering::SeqCst), 12);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*tracker.outcome.lock().unwrap(), Some(PipelineOutcome::Stage1Only));
    }
}
