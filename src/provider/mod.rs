//! The external file/inference provider, seen only through its contract.
//!
//! The pipeline talks to a [`FileProvider`]: upload a file, look up its
//! processing state by name, and run one generation over a list of file
//! references. [`gemini::GeminiClient`] is the production implementation;
//! tests substitute in-memory fakes.
//!
//! Implementations are shared across concurrent requests behind an `Arc`, so
//! every method takes `&self` and must be safe to call concurrently.

pub mod gemini;

use crate::error::ExtractError;
use crate::prompts::GenerationParams;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub use gemini::GeminiClient;

/// Lifecycle state of a file held by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    /// Still being ingested; poll again later.
    Processing,
    /// Ready to be referenced by a generation request.
    Active,
    /// Ingestion failed.
    Failed,
    /// Any state this crate does not know about. Treated as a failure.
    Other(String),
}

impl FileState {
    /// Map the provider's wire value (`PROCESSING`, `ACTIVE`, …).
    pub fn from_api(s: &str) -> Self {
        match s {
            "PROCESSING" => Self::Processing,
            "ACTIVE" => Self::Active,
            "FAILED" => Self::Failed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Active => "ACTIVE",
            Self::Failed => "FAILED",
            Self::Other(s) => s,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provider's handle for an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Provider-assigned resource name, e.g. `files/abc123`.
    pub name: String,
    /// Name shown in the provider console; the local base name.
    pub display_name: String,
    /// URI referenced by generation requests.
    pub uri: String,
    pub mime_type: String,
    pub state: FileState,
}

/// A file reference inside a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub uri: String,
    pub mime_type: String,
}

impl From<&RemoteFile> for FileRef {
    fn from(f: &RemoteFile) -> Self {
        Self {
            uri: f.uri.clone(),
            mime_type: f.mime_type.clone(),
        }
    }
}

/// One generation call: instruction, parameters, files in upload order, prompt.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub system_instruction: String,
    pub params: GenerationParams,
    pub files: Vec<FileRef>,
    pub prompt: String,
}

/// The provider's answer to a [`GenerationRequest`].
#[derive(Debug, Clone, Default)]
pub struct GenerationResponse {
    pub text: String,
    pub finish_reason: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Contract of the external AI provider.
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// Short provider identifier used in logs.
    fn name(&self) -> &str;

    /// Transfer a local file to the provider under `display_name`.
    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, ExtractError>;

    /// Look up the current state of an uploaded file by resource name.
    async fn get_file(&self, name: &str) -> Result<RemoteFile, ExtractError>;

    /// Run a single generation over the referenced files.
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ExtractError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_state_maps_wire_values() {
        assert_eq!(FileState::from_api("PROCESSING"), FileState::Processing);
        assert_eq!(FileState::from_api("ACTIVE"), FileState::Active);
        assert_eq!(FileState::from_api("FAILED"), FileState::Failed);
        assert_eq!(
            FileState::from_api("STATE_UNSPECIFIED"),
            FileState::Other("STATE_UNSPECIFIED".into())
        );
    }

    #[test]
    fn unknown_state_is_neither_ready_nor_processing() {
        let s = FileState::from_api("STATE_UNSPECIFIED");
        assert!(!s.is_ready());
        assert!(!s.is_processing());
        assert_eq!(s.to_string(), "STATE_UNSPECIFIED");
    }
}
