//! Extraction request: one generation call over every ready file.
//!
//! The request carries the fixed extraction instruction as the system
//! instruction, the fixed sampling parameters, one file reference per
//! uploaded file in upload order, and the short trigger prompt last. The
//! provider's text comes back as-is; whether it is valid JSON is checked
//! later, and only if the caller asked for it.

use crate::error::ExtractError;
use crate::prompts::{EXTRACTION_INSTRUCTION, EXTRACTION_PROMPT, GENERATION_PARAMS};
use crate::provider::{FileProvider, FileRef, GenerationRequest, GenerationResponse, RemoteFile};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Assemble the generation request for `files`.
pub fn build_request(model: &str, files: &[RemoteFile]) -> GenerationRequest {
    GenerationRequest {
        model: model.to_string(),
        system_instruction: EXTRACTION_INSTRUCTION.to_string(),
        params: GENERATION_PARAMS,
        files: files.iter().map(FileRef::from).collect(),
        prompt: EXTRACTION_PROMPT.to_string(),
    }
}

/// Send the extraction call. Exactly one provider call per invocation.
pub async fn request_extraction(
    provider: &Arc<dyn FileProvider>,
    model: &str,
    files: &[RemoteFile],
) -> Result<GenerationResponse, ExtractError> {
    if files.is_empty() {
        return Err(ExtractError::Internal(
            "extraction requested without any files".into(),
        ));
    }

    let request = build_request(model, files);
    debug!(
        "Requesting extraction from {} ({}) over {} file(s)",
        provider.name(),
        model,
        request.files.len()
    );

    let start = Instant::now();
    let response = provider.generate(&request).await?;
    info!(
        "Extraction finished in {}ms ({} prompt / {} completion tokens, finish={})",
        start.elapsed().as_millis(),
        response.prompt_tokens,
        response.completion_tokens,
        response.finish_reason.as_deref().unwrap_or("unknown")
    );
    Ok(response)
}
