//! Readiness polling: wait until uploaded files leave `PROCESSING`.
//!
//! Each file is queried by name; while the provider reports `PROCESSING` the
//! poller sleeps for [`PollPolicy::interval`] and asks again. `ACTIVE` ends
//! the wait for that file. Any other state fails the whole request at once,
//! naming the file, and no further files are polled.
//!
//! The wait per file is bounded by [`PollPolicy::max_wait`] unless the
//! caller explicitly configured `None`. Sleeping uses `tokio::time`, so a
//! waiting request never blocks other requests.

use crate::config::PollPolicy;
use crate::error::ExtractError;
use crate::provider::{FileProvider, RemoteFile};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Poll one file until it is ready, failed, or out of time.
///
/// Returns the provider's latest view of the file.
pub async fn wait_until_ready(
    provider: &Arc<dyn FileProvider>,
    file: &RemoteFile,
    policy: &PollPolicy,
) -> Result<RemoteFile, ExtractError> {
    let started = Instant::now();
    let mut queries = 0u32;

    loop {
        let current = provider.get_file(&file.name).await?;
        queries += 1;

        if current.state.is_ready() {
            debug!("{} ready after {} queries", file.name, queries);
            return Ok(current);
        }

        if !current.state.is_processing() {
            warn!("{} reached terminal state {}", file.name, current.state);
            return Err(ExtractError::FileProcessingFailed {
                name: file.name.clone(),
                state: current.state.to_string(),
            });
        }

        let mut pause = policy.interval;
        if let Some(max_wait) = policy.max_wait {
            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(ExtractError::PollTimeout {
                    name: file.name.clone(),
                    waited,
                });
            }
            pause = pause.min(max_wait - waited);
        }

        debug!(
            "{} still processing; next query in {}ms",
            file.name,
            pause.as_millis()
        );
        sleep(pause).await;
    }
}

/// Wait for every file, preserving order. Stops at the first failure.
pub async fn wait_all<F>(
    provider: &Arc<dyn FileProvider>,
    files: &[RemoteFile],
    policy: &PollPolicy,
    concurrency: usize,
    on_ready: F,
) -> Result<Vec<RemoteFile>, ExtractError>
where
    F: Fn(&RemoteFile) + Send + Sync + 'static,
{
    let on_ready = Arc::new(on_ready);
    let policy = *policy;
    let jobs: Vec<_> = files
        .iter()
        .cloned()
        .map(|file| {
            let provider = Arc::clone(provider);
            let on_ready = Arc::clone(&on_ready);
            async move {
                let ready = wait_until_ready(&provider, &file, &policy).await?;
                on_ready(&ready);
                Ok::<_, ExtractError>(ready)
            }
        })
        .collect();

    stream::iter(jobs)
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}
