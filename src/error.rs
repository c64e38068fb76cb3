//! Error types for the docextract library.
//!
//! Every pipeline failure is fatal for the request that hit it: there is no
//! partial result and no retry. [`ExtractError`] carries the human-readable
//! detail, while [`ErrorKind`] gives API consumers a stable machine-readable
//! tag so they can tell a bad upload apart from a provider outage without
//! parsing messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the extraction pipeline.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The request carried no `files` parts.
    #[error("No files uploaded")]
    NoFiles,

    /// The multipart body could not be read.
    #[error("Invalid upload: {detail}")]
    InvalidUpload { detail: String },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Creating, writing or removing request storage failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The workbook could not be opened or its first sheet read.
    #[error("Failed to convert spreadsheet '{path}': {detail}")]
    Conversion { path: PathBuf, detail: String },

    // ── Provider errors ───────────────────────────────────────────────────
    /// The provider could not be reached, or its response could not be read.
    #[error("Provider request failed during {operation}: {detail}")]
    ProviderTransport { operation: String, detail: String },

    /// The provider answered with an error status.
    #[error("Provider returned HTTP {status} during {operation}: {message}")]
    ProviderApi {
        operation: String,
        status: u16,
        message: String,
    },

    /// Generation stopped at the output-token limit; the text is incomplete.
    #[error("Provider response was truncated at the {limit}-token output limit")]
    ResponseTruncated { limit: u32 },

    /// The provider reported a terminal state other than ready.
    #[error("File {name} failed to process (state: {state})")]
    FileProcessingFailed { name: String, state: String },

    /// The file was still processing when the configured wait ran out.
    #[error("File {name} was still processing after {}s", .waited.as_secs())]
    PollTimeout { name: String, waited: Duration },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Output validation is enabled and the response was not the expected JSON.
    #[error("Provider response is not valid extraction JSON: {detail}")]
    InvalidOutput { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Shorthand for a [`ExtractError::Storage`] error.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Machine-readable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoFiles => ErrorKind::NoFiles,
            Self::InvalidUpload { .. } => ErrorKind::InvalidUpload,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Conversion { .. } => ErrorKind::Conversion,
            Self::ProviderTransport { .. } => ErrorKind::ProviderTransport,
            Self::ProviderApi { .. } | Self::ResponseTruncated { .. } => ErrorKind::ProviderApi,
            Self::FileProcessingFailed { .. } => ErrorKind::FileProcessingFailed,
            Self::PollTimeout { .. } => ErrorKind::PollTimeout,
            Self::InvalidOutput { .. } => ErrorKind::InvalidOutput,
            Self::InvalidConfig(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Stable error tags exposed to API consumers as `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoFiles,
    InvalidUpload,
    Storage,
    Conversion,
    ProviderTransport,
    ProviderApi,
    FileProcessingFailed,
    PollTimeout,
    InvalidOutput,
    Internal,
}

impl ErrorKind {
    /// True when the caller sent something unusable (HTTP 4xx).
    pub fn is_client_error(self) -> bool {
        matches!(self, Self::NoFiles | Self::InvalidUpload)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoFiles => "no_files",
            Self::InvalidUpload => "invalid_upload",
            Self::Storage => "storage",
            Self::Conversion => "conversion",
            Self::ProviderTransport => "provider_transport",
            Self::ProviderApi => "provider_api",
            Self::FileProcessingFailed => "file_processing_failed",
            Self::PollTimeout => "poll_timeout",
            Self::InvalidOutput => "invalid_output",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
