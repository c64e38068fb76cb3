//! Progress-callback trait for pipeline stage and per-file events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::ExtractConfigBuilder::progress_callback`] to observe a
//! request as it moves through the pipeline. The CLI uses it to drive a
//! spinner; tests use it to assert stage order.
//!
//! # Example
//!
//! ```rust
//! use docextract::{ExtractConfig, PipelineProgressCallback, Stage};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StageLog(Mutex<Vec<Stage>>);
//!
//! impl PipelineProgressCallback for StageLog {
//!     fn on_stage(&self, _request_id: &str, stage: Stage) {
//!         self.0.lock().unwrap().push(stage);
//!     }
//! }
//!
//! let log = Arc::new(StageLog::default());
//! let config = ExtractConfig::builder()
//!     .progress_callback(log.clone() as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::ExtractionStats;
use crate::pipeline::Stage;
use crate::provider::RemoteFile;
use std::sync::Arc;

/// Called by the pipeline as a request progresses.
///
/// Implementations must be `Send + Sync`: with `upload_concurrency > 1`,
/// `on_file_uploaded` and `on_file_ready` may fire concurrently. All methods
/// default to no-ops.
pub trait PipelineProgressCallback: Send + Sync {
    /// The request entered `stage`.
    fn on_stage(&self, request_id: &str, stage: Stage) {
        let _ = (request_id, stage);
    }

    /// A spreadsheet was replaced by its CSV rendition.
    fn on_file_converted(&self, request_id: &str, original: &str, converted: &str) {
        let _ = (request_id, original, converted);
    }

    /// A file reached the provider.
    ///
    /// # Arguments
    /// * `index`: 0-based position in upload order
    /// * `total`: number of files in the request
    fn on_file_uploaded(&self, request_id: &str, index: usize, total: usize, remote: &RemoteFile) {
        let _ = (request_id, index, total, remote);
    }

    /// The provider finished processing a file.
    fn on_file_ready(&self, request_id: &str, remote_name: &str) {
        let _ = (request_id, remote_name);
    }

    /// The extraction text is available.
    fn on_pipeline_complete(&self, request_id: &str, stats: &ExtractionStats) {
        let _ = (request_id, stats);
    }

    /// The request failed while in `stage`.
    fn on_pipeline_error(&self, request_id: &str, stage: Stage, error: &str) {
        let _ = (request_id, stage, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
