//! # docextract
//!
//! Extract invoices, products and customers from uploaded business documents
//! using the Gemini API.
//!
//! Files arrive over HTTP (`POST /upload`, multipart field `files`) or from
//! the command line. Spreadsheets are flattened to CSV, everything is
//! uploaded to the Gemini Files API, and a single `generateContent` call asks
//! the model for one JSON document covering every file.
//!
//! ## Pipeline Overview
//!
//! ```text
//! multipart upload
//!  │
//!  ├─ 1. Store      write each part into uploads/<request-id>/
//!  ├─ 2. Normalize  .xlsx / .xls → first sheet as CSV (spawn_blocking)
//!  ├─ 3. Upload     Files API, one call per file, order preserved
//!  ├─ 4. Poll       wait until every file leaves PROCESSING
//!  ├─ 5. Extract    one generateContent call over all files
//!  └─ 6. Respond    raw model text (+ parsed JSON if validation is on), then clean up
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docextract::{ExtractConfig, Extractor, GeminiClient};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GeminiClient::new(std::env::var("GEMINI_API_KEY")?)?;
//!     let extractor = Extractor::new(Arc::new(client), ExtractConfig::default());
//!     let output = extractor
//!         .extract_files(&[PathBuf::from("invoices.xlsx"), PathBuf::from("receipt.pdf")])
//!         .await?;
//!     println!("{}", output.raw_text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docextract` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod provider;
pub mod server;

#[cfg(test)]
mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CleanupPolicy, ExtractConfig, ExtractConfigBuilder, PollPolicy};
pub use error::{ErrorKind, ExtractError};
pub use extract::Extractor;
pub use output::{Customer, Extraction, ExtractionOutput, ExtractionStats, Invoice, Product};
pub use pipeline::scope::RequestScope;
pub use pipeline::Stage;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use provider::{FileProvider, FileState, GeminiClient, RemoteFile};
pub use server::{router, AppState};
