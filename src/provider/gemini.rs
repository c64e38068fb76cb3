//! Gemini Files API and `generateContent` over reqwest.
//!
//! Three endpoints are used:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | upload    | `POST /upload/v1beta/files` (multipart/related: JSON metadata + bytes) |
//! | status    | `GET  /v1beta/{name}` |
//! | generate  | `POST /v1beta/models/{model}:generateContent` |
//!
//! The API key travels in the `x-goog-api-key` header so it never appears
//! in URLs or request logs. One [`GeminiClient`] is built at process start
//! and shared; `reqwest::Client` pools connections internally and is safe
//! to use from many tasks at once.
//!
//! See: <https://ai.google.dev/api/files>

use super::{FileProvider, FileState, GenerationRequest, GenerationResponse, RemoteFile};
use crate::error::ExtractError;
use crate::prompts::GenerationParams;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Public Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini provider client.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiClient {
    /// Create a client for the public endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ExtractError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL, None)
    }

    /// Create a client for a custom endpoint (proxies, test doubles).
    ///
    /// `timeout` bounds each individual HTTP call, not the readiness wait.
    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, ExtractError> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let http = builder
            .build()
            .map_err(|e| ExtractError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.base_url)
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, name)
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    /// Send a prepared request and decode a JSON body, mapping failures.
    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ExtractError> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| transport(operation, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractError::ProviderApi {
                operation: operation.to_string(),
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        response.json::<T>().await.map_err(|e| transport(operation, e))
    }
}

#[async_trait]
impl FileProvider for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, ExtractError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractError::storage(path, e))?;
        debug!("Uploading {} ({} bytes, {})", display_name, data.len(), mime_type);

        let boundary = format!("docextract-{}", Uuid::new_v4().simple());
        let body = multipart_related_body(&boundary, display_name, mime_type, &data)?;

        let request = self
            .http
            .post(self.upload_url())
            .header("X-Goog-Upload-Protocol", "multipart")
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body);

        let response: UploadFileResponse = self.send_json("upload", request).await?;
        Ok(response.file.into())
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, ExtractError> {
        let request = self.http.get(self.file_url(name));
        let file: WireFile = self.send_json("file status", request).await?;
        Ok(file.into())
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ExtractError> {
        let body = GenerateContentRequest::from_request(request);
        let http_request = self.http.post(self.generate_url(&request.model)).json(&body);
        let response: GenerateContentResponse =
            self.send_json("generateContent", http_request).await?;
        response.into_generation(request.params.max_output_tokens)
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UploadFileResponse {
    file: WireFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    state: Option<String>,
}

impl From<WireFile> for RemoteFile {
    fn from(f: WireFile) -> Self {
        Self {
            name: f.name,
            display_name: f.display_name,
            uri: f.uri,
            mime_type: f.mime_type,
            state: FileState::from_api(f.state.as_deref().unwrap_or("STATE_UNSPECIFIED")),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: &'a GenerationParams,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: FileData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_request(request: &'a GenerationRequest) -> Self {
        let mut parts: Vec<Part<'a>> = request
            .files
            .iter()
            .map(|f| Part::File {
                file_data: FileData {
                    mime_type: &f.mime_type,
                    file_uri: &f.uri,
                },
            })
            .collect();
        parts.push(Part::Text {
            text: &request.prompt,
        });

        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text {
                    text: &request.system_instruction,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts,
            }],
            generation_config: &request.params,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl GenerateContentResponse {
    fn into_generation(self, max_output_tokens: u32) -> Result<GenerationResponse, ExtractError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            return Err(ExtractError::ProviderApi {
                operation: "generateContent".to_string(),
                status: 200,
                message: format!("Generation blocked: {reason}"),
            });
        };

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            return Err(ExtractError::ResponseTruncated {
                limit: max_output_tokens,
            });
        }

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        let (prompt_tokens, completion_tokens) = self
            .usage_metadata
            .map(|u| (u.prompt_token_count, u.candidates_token_count))
            .unwrap_or_default();

        Ok(GenerationResponse {
            text,
            finish_reason: candidate.finish_reason,
            prompt_tokens,
            completion_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    status: Option<String>,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Build the two-part `multipart/related` upload body: JSON metadata, then bytes.
fn multipart_related_body(
    boundary: &str,
    display_name: &str,
    mime_type: &str,
    data: &[u8],
) -> Result<Vec<u8>, ExtractError> {
    let metadata = serde_json::to_vec(&serde_json::json!({
        "file": { "displayName": display_name }
    }))
    .map_err(|e| ExtractError::Internal(format!("upload metadata: {e}")))?;

    let mut body = Vec::with_capacity(data.len() + metadata.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&metadata);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    Ok(body)
}

/// Pull a readable message out of a Gemini error body, falling back to the raw text.
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(ApiErrorResponse {
            error: Some(detail),
        }) => detail
            .message
            .or(detail.status)
            .unwrap_or_else(|| "Unknown API error".to_string()),
        _ if body.trim().is_empty() => "empty error body".to_string(),
        _ => body.trim().to_string(),
    }
}

fn transport(operation: &str, e: reqwest::Error) -> ExtractError {
    ExtractError::ProviderTransport {
        operation: operation.to_string(),
        detail: e.to_string(),
    }
}
