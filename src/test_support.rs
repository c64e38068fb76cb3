//! In-memory provider double shared by the unit tests.
//!
//! Files get a scripted sequence of states: each status query consumes the
//! next one and the last state repeats forever.

use crate::error::ExtractError;
use crate::provider::{
    FileProvider, FileState, GenerationRequest, GenerationResponse, RemoteFile,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct UploadCall {
    pub path: PathBuf,
    pub mime_type: String,
    pub display_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
struct State {
    next_id: usize,
    scripts: HashMap<String, VecDeque<FileState>>,
    files: HashMap<String, RemoteFile>,
    upload_scripts: HashMap<String, Vec<FileState>>,
    uploads: Vec<UploadCall>,
    status_queries: HashMap<String, usize>,
    generate_calls: Vec<GenerationRequest>,
    response_text: Option<String>,
    generate_error: Option<String>,
    upload_error: Option<String>,
}

#[derive(Default)]
pub(crate) struct FakeProvider {
    state: Mutex<State>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(state: &mut State, display_name: &str, mime_type: &str, script: Vec<FileState>) -> RemoteFile {
        state.next_id += 1;
        let name = format!("files/fake-{}", state.next_id);
        let remote = RemoteFile {
            name: name.clone(),
            display_name: display_name.to_string(),
            uri: format!("https://fake.test/v1beta/{name}"),
            mime_type: mime_type.to_string(),
            state: FileState::Processing,
        };
        let script = if script.is_empty() {
            vec![FileState::Active]
        } else {
            script
        };
        state.scripts.insert(name.clone(), script.into());
        state.files.insert(name, remote.clone());
        remote
    }

    /// Register a remote file directly, without an upload call.
    pub fn seed_file(&self, display_name: &str, script: Vec<FileState>) -> RemoteFile {
        let mut state = self.state.lock().unwrap();
        Self::register(&mut state, display_name, "application/octet-stream", script)
    }

    /// States reported for the file uploaded as `display_name`. Default: `[ACTIVE]`.
    pub fn script_upload(&self, display_name: &str, script: Vec<FileState>) {
        self.state
            .lock()
            .unwrap()
            .upload_scripts
            .insert(display_name.to_string(), script);
    }

    pub fn respond_with(&self, text: &str) {
        self.state.lock().unwrap().response_text = Some(text.to_string());
    }

    pub fn fail_generation(&self, message: &str) {
        self.state.lock().unwrap().generate_error = Some(message.to_string());
    }

    pub fn fail_uploads(&self, message: &str) {
        self.state.lock().unwrap().upload_error = Some(message.to_string());
    }

    pub fn uploads(&self) -> Vec<UploadCall> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn status_queries(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .status_queries
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_status_queries(&self) -> usize {
        self.state.lock().unwrap().status_queries.values().sum()
    }

    pub fn generate_calls(&self) -> Vec<GenerationRequest> {
        self.state.lock().unwrap().generate_calls.clone()
    }
}

#[async_trait]
impl FileProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, ExtractError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractError::storage(path, e))?;

        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.upload_error.clone() {
            return Err(ExtractError::ProviderTransport {
                operation: "upload".into(),
                detail: message,
            });
        }
        state.uploads.push(UploadCall {
            path: path.to_path_buf(),
            mime_type: mime_type.to_string(),
            display_name: display_name.to_string(),
            bytes,
        });
        let script = state
            .upload_scripts
            .get(display_name)
            .cloned()
            .unwrap_or_default();
        Ok(Self::register(&mut state, display_name, mime_type, script))
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, ExtractError> {
        let mut state = self.state.lock().unwrap();
        *state.status_queries.entry(name.to_string()).or_default() += 1;

        let script = state
            .scripts
            .get_mut(name)
            .ok_or_else(|| ExtractError::ProviderApi {
                operation: "file status".into(),
                status: 404,
                message: format!("{name} not found"),
            })?;
        let current = if script.len() > 1 {
            script.pop_front().unwrap_or(FileState::Active)
        } else {
            script.front().cloned().unwrap_or(FileState::Active)
        };

        let mut remote = state.files[name].clone();
        remote.state = current;
        Ok(remote)
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, ExtractError> {
        let mut state = self.state.lock().unwrap();
        state.generate_calls.push(request.clone());
        if let Some(message) = state.generate_error.clone() {
            return Err(ExtractError::ProviderApi {
                operation: "generateContent".into(),
                status: 503,
                message,
            });
        }
        Ok(GenerationResponse {
            text: state
                .response_text
                .clone()
                .unwrap_or_else(|| r#"{"invoices":[],"products":[],"customers":[]}"#.to_string()),
            finish_reason: Some("STOP".into()),
            prompt_tokens: 100,
            completion_tokens: 20,
        })
    }
}

/// A one-sheet workbook holding `rows`, as `.xlsx` bytes.
pub(crate) fn xlsx_bytes(rows: &[&[&str]]) -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let sheet = workbook.add_worksheet();
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            sheet.write(r as u32, c as u16, *value).unwrap();
        }
    }
    workbook.save_to_buffer().unwrap()
}
