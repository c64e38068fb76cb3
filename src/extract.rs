//! Pipeline orchestration: one request from stored files to extraction text.
//!
//! [`Extractor`] owns the provider client and the configuration and walks a
//! [`RequestScope`] through the stages in [`Stage`] order:
//!
//! ```text
//! Received → FilesStored → Normalized → Uploaded → FilesReady → Extracted
//!          → Responded → CleanedUp
//! ```
//!
//! Any failure moves the request to `Failed`. There is no retry and no
//! partial result: the first error ends the request.
//!
//! Running and cleaning up are separate calls. The HTTP handler builds its
//! response between [`Extractor::run`] and [`Extractor::finish`] so that
//! `Responded` precedes `CleanedUp`; library and CLI callers use
//! [`Extractor::extract`], which does both.

use crate::config::ExtractConfig;
use crate::error::ExtractError;
use crate::output::{ExtractionOutput, ExtractionStats};
use crate::pipeline::scope::RequestScope;
use crate::pipeline::{extract, normalize, poll, postprocess, upload, Stage};
use crate::provider::{FileProvider, RemoteFile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Runs extraction requests against one provider.
pub struct Extractor {
    provider: Arc<dyn FileProvider>,
    config: ExtractConfig,
}

impl Extractor {
    pub fn new(provider: Arc<dyn FileProvider>, config: ExtractConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn FileProvider> {
        &self.provider
    }

    /// Start a request: fresh id, directory not yet created.
    pub fn new_scope(&self) -> RequestScope {
        let scope = RequestScope::new(&self.config.uploads_root);
        debug!(request_id = %scope.id(), "Request received");
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(&scope.id().to_string(), Stage::Received);
        }
        scope
    }

    /// Record that `scope` entered `stage` and notify the progress callback.
    pub fn advance(&self, scope: &mut RequestScope, stage: Stage) {
        scope.set_stage(stage);
        debug!(request_id = %scope.id(), "Stage {}", stage);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(&scope.id().to_string(), stage);
        }
    }

    /// Move `scope` to `Failed`, reporting the stage it failed in.
    pub fn fail(&self, scope: &mut RequestScope, error: &ExtractError) {
        let stage = scope.stage();
        if stage.is_terminal() {
            return;
        }
        warn!(
            request_id = %scope.id(),
            kind = %error.kind(),
            "Request failed during {}: {}",
            stage,
            error
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_pipeline_error(&scope.id().to_string(), stage, &error.to_string());
        }
        self.advance(scope, Stage::Failed);
    }

    /// Run the pipeline over the files already stored in `scope`.
    ///
    /// Does not remove the request directory; call [`Extractor::finish`]
    /// afterwards. On error the scope is already in `Failed`.
    pub async fn run(&self, scope: &mut RequestScope) -> Result<ExtractionOutput, ExtractError> {
        let span = info_span!("extract", request_id = %scope.id());
        let result = self.run_stages(scope).instrument(span).await;
        if let Err(ref e) = result {
            self.fail(scope, e);
        }
        result
    }

    async fn run_stages(&self, scope: &mut RequestScope) -> Result<ExtractionOutput, ExtractError> {
        let total_start = Instant::now();
        let request_id = scope.id().to_string();
        let cb = self.config.progress_callback.as_ref();

        // ── Step 1: Files stored ─────────────────────────────────────────────
        if scope.is_empty() {
            return Err(ExtractError::NoFiles);
        }
        let total = scope.files().len();
        self.advance(scope, Stage::FilesStored);
        info!("Processing {} file(s) with {}", total, self.provider.name());

        // ── Step 2: Spreadsheets → CSV ───────────────────────────────────────
        let conversions = normalize::normalize_files(scope).await?;
        if let Some(cb) = cb {
            for c in &conversions {
                cb.on_file_converted(
                    &request_id,
                    &c.original.display().to_string(),
                    &c.converted.display().to_string(),
                );
            }
        }
        self.advance(scope, Stage::Normalized);

        // ── Step 3: Upload ───────────────────────────────────────────────────
        let upload_start = Instant::now();
        let on_uploaded = {
            let cb = cb.cloned();
            let request_id = request_id.clone();
            move |idx: usize, remote: &RemoteFile| {
                if let Some(ref cb) = cb {
                    cb.on_file_uploaded(&request_id, idx, total, remote);
                }
            }
        };
        let uploaded = upload::upload_all(
            &self.provider,
            scope.files(),
            self.config.upload_concurrency,
            on_uploaded,
        )
        .await?;
        let upload_duration_ms = upload_start.elapsed().as_millis() as u64;
        self.advance(scope, Stage::Uploaded);

        // ── Step 4: Wait for processing ──────────────────────────────────────
        let poll_start = Instant::now();
        let on_ready = {
            let cb = cb.cloned();
            let request_id = request_id.clone();
            move |remote: &RemoteFile| {
                if let Some(ref cb) = cb {
                    cb.on_file_ready(&request_id, &remote.name);
                }
            }
        };
        let ready = poll::wait_all(
            &self.provider,
            &uploaded,
            &self.config.poll,
            self.config.upload_concurrency,
            on_ready,
        )
        .await?;
        let poll_duration_ms = poll_start.elapsed().as_millis() as u64;
        self.advance(scope, Stage::FilesReady);

        // ── Step 5: Extraction call ──────────────────────────────────────────
        let generate_start = Instant::now();
        let response = extract::request_extraction(&self.provider, &self.config.model, &ready).await?;
        let generate_duration_ms = generate_start.elapsed().as_millis() as u64;

        let extraction = if self.config.validate_output {
            Some(postprocess::parse_extraction(&response.text)?)
        } else {
            None
        };
        self.advance(scope, Stage::Extracted);

        let stats = ExtractionStats {
            files: total,
            converted_files: conversions.len(),
            upload_duration_ms,
            poll_duration_ms,
            generate_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
        };
        info!(
            "Extraction complete: {} file(s), {} converted, {}ms total",
            stats.files, stats.converted_files, stats.total_duration_ms
        );
        if let Some(cb) = cb {
            cb.on_pipeline_complete(&request_id, &stats);
        }

        Ok(ExtractionOutput {
            request_id,
            raw_text: response.text,
            extraction,
            files: ready,
            stats,
        })
    }

    /// Apply the cleanup policy to a finished request.
    ///
    /// Returns whether a directory was removed. `CleanedUp` is reported only
    /// for successful requests; a failed request stays in `Failed`.
    pub async fn finish(&self, scope: &mut RequestScope, succeeded: bool) -> Result<bool, ExtractError> {
        if !self.config.cleanup.applies(succeeded) {
            info!(
                request_id = %scope.id(),
                "Keeping {} for inspection",
                scope.dir().display()
            );
            return Ok(false);
        }
        let removed = scope.cleanup().await?;
        if succeeded {
            self.advance(scope, Stage::CleanedUp);
        }
        Ok(removed)
    }

    /// Run, then clean up. Cleanup failures are logged, not returned.
    pub async fn extract(&self, scope: &mut RequestScope) -> Result<ExtractionOutput, ExtractError> {
        let result = self.run(scope).await;
        let succeeded = result.is_ok();
        if succeeded {
            self.advance(scope, Stage::Responded);
        }
        if let Err(e) = self.finish(scope, succeeded).await {
            warn!(request_id = %scope.id(), "Cleanup failed: {}", e);
        }
        result
    }

    /// Copy local files into a new request and extract from them.
    pub async fn extract_files(&self, paths: &[PathBuf]) -> Result<ExtractionOutput, ExtractError> {
        let mut scope = self.new_scope();
        for path in paths {
            if let Err(e) = scope.import(path).await {
                self.fail(&mut scope, &e);
                if let Err(ce) = self.finish(&mut scope, false).await {
                    warn!(request_id = %scope.id(), "Cleanup failed: {}", ce);
                }
                return Err(e);
            }
        }
        self.extract(&mut scope).await
    }
}
