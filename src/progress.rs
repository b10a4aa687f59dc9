//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::ToolkitConfigBuilder::progress_callback`] to receive
//! events while a job runs: the overall `(fraction, message)` pair that a
//! progress bar needs, plus finer step and segment events.
//!
//! # Example
//!
//! ```rust
//! use daisy_braille_toolkit::{PipelineProgressCallback, ToolkitConfig};
//! use std::sync::{Arc, Mutex};
//!
//! struct LastMessage(Mutex<String>);
//!
//! impl PipelineProgressCallback for LastMessage {
//!     fn on_progress(&self, fraction: f64, message: &str) {
//!         *self.0.lock().unwrap() = format!("{:.0}% {message}", fraction * 100.0);
//!     }
//! }
//!
//! let cb = Arc::new(LastMessage(Mutex::new(String::new())));
//! let config = ToolkitConfig::builder()
//!     .progress_callback(cb as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::manifest::PipelineStep;
use std::sync::Arc;

/// Called by the pipeline runner as a job advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive from the task driving the job, one at
/// a time.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once with the steps that will run (after skipping completed ones).
    fn on_run_start(&self, steps: &[PipelineStep]) {
        let _ = steps;
    }

    /// Overall progress in `0.0..=1.0` with a status line.
    fn on_progress(&self, fraction: f64, message: &str) {
        let _ = (fraction, message);
    }

    /// Called before a step executes.
    ///
    /// # Arguments
    /// * `position`: 1-indexed position in the plan
    /// * `total`: number of steps in the plan
    fn on_step_start(&self, step: PipelineStep, position: usize, total: usize) {
        let _ = (step, position, total);
    }

    /// Called after a step completed and was persisted.
    fn on_step_complete(&self, step: PipelineStep, position: usize, total: usize) {
        let _ = (step, position, total);
    }

    /// Called after a step failed and the failure was persisted.
    fn on_step_error(&self, step: PipelineStep, error: &str) {
        let _ = (step, error);
    }

    /// Called after a TTS segment's audio is in the job folder.
    ///
    /// # Arguments
    /// * `index`: 1-indexed segment number
    /// * `total`: segments in the document
    /// * `from_cache`: true when no provider call was made
    fn on_segment_complete(&self, index: usize, total: usize, from_cache: bool) {
        let _ = (index, total, from_cache);
    }

    /// Called once after the last planned step completed.
    fn on_run_complete(&self, executed: usize) {
        let _ = executed;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ToolkitConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
