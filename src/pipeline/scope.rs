//! Request scoping: one id, one directory, one file list per request.
//!
//! A [`RequestScope`] is created when a request arrives. Its directory
//! (`<uploads_root>/<uuid>`) is created lazily on the first stored file, so a
//! request that carries no files never touches the filesystem. Every stored
//! file is tracked as a [`LocalFile`]; later stages replace entries in place
//! so there is always exactly one on-disk artifact per logical input.

use crate::error::ExtractError;
use crate::pipeline::Stage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Content type used when nothing better is known.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// A file materialised in the request directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalFile {
    /// Name the client sent, before sanitisation.
    pub original_name: String,
    /// Where the bytes live now.
    pub path: PathBuf,
    /// Declared (or guessed) MIME type.
    pub content_type: String,
    /// Size in bytes of the file at `path`.
    pub size: u64,
}

impl LocalFile {
    /// Base name of the on-disk file; used as the provider display name.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.original_name.clone())
    }
}

/// Per-request storage and file list.
#[derive(Debug)]
pub struct RequestScope {
    id: Uuid,
    dir: PathBuf,
    files: Vec<LocalFile>,
    dir_created: bool,
    cleaned_up: bool,
    stage: Stage,
}

impl RequestScope {
    /// Allocate a fresh id and derive the directory under `uploads_root`.
    ///
    /// Nothing is created on disk yet.
    pub fn new(uploads_root: impl AsRef<Path>) -> Self {
        let id = Uuid::new_v4();
        let dir = uploads_root.as_ref().join(id.to_string());
        Self {
            id,
            dir,
            files: Vec::new(),
            dir_created: false,
            cleaned_up: false,
            stage: Stage::Received,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[LocalFile] {
        &self.files
    }

    pub(crate) fn files_mut(&mut self) -> &mut Vec<LocalFile> {
        &mut self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Last stage this request entered.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Create the request directory (recursive, idempotent).
    pub async fn ensure_dir(&mut self) -> Result<(), ExtractError> {
        if self.dir_created {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ExtractError::storage(&self.dir, e))?;
        self.dir_created = true;
        debug!("Created request directory {}", self.dir.display());
        Ok(())
    }

    /// Write an uploaded file into the request directory.
    ///
    /// The client-supplied name is reduced to its final path component and
    /// made unique within the request. `content_type` falls back to a guess
    /// from the extension when it is missing or generic.
    pub async fn store(
        &mut self,
        original_name: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<&LocalFile, ExtractError> {
        self.ensure_dir().await?;

        let file_name = self.unique_name(&sanitize_file_name(original_name, self.files.len()));
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| ExtractError::storage(&path, e))?;

        let entry = LocalFile {
            original_name: original_name.to_string(),
            content_type: resolve_content_type(content_type, &file_name),
            size: data.len() as u64,
            path,
        };
        debug!(
            "Stored {} as {} ({} bytes, {})",
            original_name,
            entry.path.display(),
            entry.size,
            entry.content_type
        );
        self.files.push(entry);
        Ok(&self.files[self.files.len() - 1])
    }

    /// Copy a local file into the request directory (CLI path).
    pub async fn import(&mut self, source: &Path) -> Result<&LocalFile, ExtractError> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| ExtractError::storage(source, e))?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.store(&name, None, &data).await
    }

    /// Pick a name in the request directory not held by any tracked file.
    ///
    /// `report.csv` becomes `report-1.csv`, `report-2.csv`, … on collision.
    pub(crate) fn unique_name(&self, candidate: &str) -> String {
        let taken = |name: &str| self.files.iter().any(|f| f.file_name() == name);
        if !taken(candidate) {
            return candidate.to_string();
        }
        let (stem, ext) = split_extension(candidate);
        (1..)
            .map(|n| match ext {
                Some(ext) => format!("{stem}-{n}.{ext}"),
                None => format!("{stem}-{n}"),
            })
            .find(|name| !taken(name))
            .unwrap_or_else(|| format!("{}-{}", Uuid::new_v4().simple(), candidate))
    }

    /// Remove the request directory and everything in it.
    ///
    /// Safe to call more than once; only the first call touches the disk.
    /// Returns whether a directory was actually removed.
    pub async fn cleanup(&mut self) -> Result<bool, ExtractError> {
        if self.cleaned_up {
            return Ok(false);
        }
        self.cleaned_up = true;
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(request_id = %self.id, "Removed request directory");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ExtractError::storage(&self.dir, e)),
        }
    }
}

/// Reduce a client-supplied file name to a safe single path component.
pub fn sanitize_file_name(name: &str, index: usize) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_start_matches('.');
    if last.is_empty() {
        format!("upload-{}", index + 1)
    } else {
        last.to_string()
    }
}

/// Use the declared type unless it is missing or generic; otherwise guess.
pub fn resolve_content_type(declared: Option<&str>, file_name: &str) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != FALLBACK_CONTENT_TYPE => ct.to_string(),
        _ => mime_guess::from_path(file_name)
            .first_raw()
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string(),
    }
}

fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}
