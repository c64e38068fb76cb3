//! Pipeline stages for document extraction.
//!
//! Each submodule implements exactly one step; [`crate::extract`] sequences
//! them per request.
//!
//! ## Data Flow
//!
//! ```text
//! scope ──▶ normalize ──▶ upload ──▶ poll ──▶ extract ──▶ postprocess
//! (dir)     (xlsx→csv)    (files)    (ready)  (generate)  (optional JSON check)
//! ```
//!
//! 1. [`scope`]    : per-request id, storage directory, local file list
//! 2. [`normalize`]: replace spreadsheets with CSV of their first sheet;
//!    runs in `spawn_blocking` because workbook parsing is synchronous
//! 3. [`upload`]   : push each local file to the provider
//! 4. [`poll`]     : wait until every remote file leaves `PROCESSING`
//! 5. [`extract`]  : one generation call over all ready files
//! 6. [`postprocess`]: strip fences and parse the result when validation is on

pub mod extract;
pub mod normalize;
pub mod poll;
pub mod postprocess;
pub mod scope;
pub mod upload;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a request is in its lifecycle.
///
/// The success path visits every state in declaration order up to
/// `CleanedUp`; `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    FilesStored,
    Normalized,
    Uploaded,
    FilesReady,
    Extracted,
    Responded,
    CleanedUp,
    Failed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::FilesStored => "files_stored",
            Stage::Normalized => "normalized",
            Stage::Uploaded => "uploaded",
            Stage::FilesReady => "files_ready",
            Stage::Extracted => "extracted",
            Stage::Responded => "responded",
            Stage::CleanedUp => "cleaned_up",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::CleanedUp | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
