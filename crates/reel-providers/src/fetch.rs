//! Artifact download with capped exponential backoff.

use std::path::Path;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::adapter::GenerationAdapter;
use crate::config::FetchRetryConfig;
use crate::error::ProviderResult;
use crate::metrics::record_fetch_retry;

/// Download `locator` into `path`, retrying transient failures. Each attempt
/// rewrites the file from scratch. Returns the number of bytes written.
pub async fn fetch_to_file(
    adapter: &dyn GenerationAdapter,
    locator: &str,
    path: &Path,
    retry: &FetchRetryConfig,
) -> ProviderResult<u64> {
    let mut attempt = 0u32;
    loop {
        match download_once(adapter, locator, path).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                attempt += 1;
                let delay = retry.delay_for_attempt(attempt);
                record_fetch_retry(adapter.backend().as_str());
                warn!(
                    backend = %adapter.backend(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Artifact download failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn download_once(adapter: &dyn GenerationAdapter, locator: &str, path: &Path) -> ProviderResult<u64> {
    let mut stream = adapter.fetch(locator).await?;
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
