//! Provider upload: push local files and collect remote handles.
//!
//! Each file is transferred in a single attempt under its base name; a
//! transport or API failure aborts the request. With `concurrency > 1` several
//! uploads run at once, but the returned handles are always in input order
//! (`StreamExt::buffered`, not `buffer_unordered`), since the extraction
//! request lists files in that order.

use crate::error::ExtractError;
use crate::pipeline::scope::LocalFile;
use crate::provider::{FileProvider, RemoteFile};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// Upload one file under a display name equal to its base name.
pub async fn upload_file(
    provider: &Arc<dyn FileProvider>,
    file: &LocalFile,
) -> Result<RemoteFile, ExtractError> {
    let display_name = file.file_name();
    let remote = provider
        .upload_file(&file.path, &file.content_type, &display_name)
        .await?;
    debug!(
        "Uploaded {} to {} as {} (state {})",
        display_name,
        provider.name(),
        remote.name,
        remote.state
    );
    Ok(remote)
}

/// Upload every file, preserving order. Stops at the first failure.
///
/// `on_uploaded` receives the 0-based input index of each finished upload.
/// Every upload future owns its inputs, so the returned future is `Send`
/// and can be awaited from an axum handler.
pub async fn upload_all<F>(
    provider: &Arc<dyn FileProvider>,
    files: &[LocalFile],
    concurrency: usize,
    on_uploaded: F,
) -> Result<Vec<RemoteFile>, ExtractError>
where
    F: Fn(usize, &RemoteFile) + Send + Sync + 'static,
{
    let on_uploaded = Arc::new(on_uploaded);
    let jobs: Vec<_> = files
        .iter()
        .cloned()
        .enumerate()
        .map(|(idx, file)| {
            let provider = Arc::clone(provider);
            let on_uploaded = Arc::clone(&on_uploaded);
            async move {
                let remote = upload_file(&provider, &file).await?;
                on_uploaded(idx, &remote);
                Ok::<_, ExtractError>(remote)
            }
        })
        .collect();

    stream::iter(jobs)
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}
