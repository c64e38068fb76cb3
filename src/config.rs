//! Configuration types for the extraction pipeline.
//!
//! All pipeline behaviour is controlled through [`ExtractConfig`], built via
//! its [`ExtractConfigBuilder`]. The provider client itself is not part of
//! the config: it is constructed once at process start and handed to
//! [`crate::extract::Extractor`] separately.
//!
//! The sampling parameters of the extraction call are fixed in
//! [`crate::prompts::GENERATION_PARAMS`] and cannot be set here.

use crate::error::ExtractError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default model used for extraction.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Default root under which every request gets its own directory.
pub const DEFAULT_UPLOADS_ROOT: &str = "uploads";

/// Configuration for the extraction pipeline.
///
/// # Example
/// ```rust
/// use docextract::{CleanupPolicy, ExtractConfig};
/// use std::time::Duration;
///
/// let config = ExtractConfig::builder()
///     .uploads_root("/var/lib/docextract/uploads")
///     .poll_interval(Duration::from_secs(5))
///     .max_poll_wait(Some(Duration::from_secs(300)))
///     .cleanup(CleanupPolicy::Always)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractConfig {
    /// Root directory for per-request storage. Default: `uploads`.
    pub uploads_root: PathBuf,

    /// Provider model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// How long to wait for uploaded files to finish processing.
    pub poll: PollPolicy,

    /// When to remove a request's storage directory. Default: [`CleanupPolicy::Always`].
    pub cleanup: CleanupPolicy,

    /// Number of files uploaded and polled at once. Default: 1 (strictly sequential).
    ///
    /// Values above 1 fan out the per-file upload and readiness wait; the
    /// extraction request still lists files in upload order.
    pub upload_concurrency: usize,

    /// Parse the provider response into [`crate::output::Extraction`] and
    /// fail the request when it is not valid JSON. Default: false.
    ///
    /// The raw text is returned either way.
    pub validate_output: bool,

    /// Observer for stage and per-file events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            uploads_root: PathBuf::from(DEFAULT_UPLOADS_ROOT),
            model: DEFAULT_MODEL.to_string(),
            poll: PollPolicy::default(),
            cleanup: CleanupPolicy::default(),
            upload_concurrency: 1,
            validate_output: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractConfig")
            .field("uploads_root", &self.uploads_root)
            .field("model", &self.model)
            .field("poll", &self.poll)
            .field("cleanup", &self.cleanup)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("validate_output", &self.validate_output)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractConfig {
    /// Create a new builder for `ExtractConfig`.
    pub fn builder() -> ExtractConfigBuilder {
        ExtractConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractConfig`].
#[derive(Debug)]
pub struct ExtractConfigBuilder {
    config: ExtractConfig,
}

impl ExtractConfigBuilder {
    pub fn uploads_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.uploads_root = root.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll.interval = interval;
        self
    }

    /// `None` waits for as long as the provider keeps the file processing.
    pub fn max_poll_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.config.poll.max_wait = max_wait;
        self
    }

    pub fn cleanup(mut self, policy: CleanupPolicy) -> Self {
        self.config.cleanup = policy;
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn validate_output(mut self, v: bool) -> Self {
        self.config.validate_output = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractConfig, ExtractError> {
        let c = &self.config;
        if c.model.trim().is_empty() {
            return Err(ExtractError::InvalidConfig("Model name must not be empty".into()));
        }
        if c.uploads_root.as_os_str().is_empty() {
            return Err(ExtractError::InvalidConfig(
                "Uploads root must not be empty".into(),
            ));
        }
        if let Some(max_wait) = c.poll.max_wait {
            if max_wait < c.poll.interval {
                return Err(ExtractError::InvalidConfig(format!(
                    "Max poll wait ({}s) is shorter than the poll interval ({}s)",
                    max_wait.as_secs(),
                    c.poll.interval.as_secs()
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Policies ─────────────────────────────────────────────────────────────

/// Readiness polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Pause between status queries. Default: 10 s.
    pub interval: Duration,
    /// Give up on a file after this long. Default: 10 minutes. `None` = never.
    pub max_wait: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_wait: Some(Duration::from_secs(600)),
        }
    }
}

/// When a request's storage directory is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupPolicy {
    /// Remove on success and on failure. (default)
    #[default]
    Always,
    /// Remove on success only; failed requests keep their files for inspection.
    OnSuccess,
}

impl CleanupPolicy {
    /// Whether the directory goes away for a run that ended this way.
    pub fn applies(self, succeeded: bool) -> bool {
        match self {
            CleanupPolicy::Always => true,
            CleanupPolicy::OnSuccess => succeeded,
        }
    }
}

impl FromStr for CleanupPolicy {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(CleanupPolicy::Always),
            "on-success" | "on_success" | "success" => Ok(CleanupPolicy::OnSuccess),
            other => Err(ExtractError::InvalidConfig(format!(
                "Unknown cleanup policy '{other}' (expected 'always' or 'on-success')"
            ))),
        }
    }
}
