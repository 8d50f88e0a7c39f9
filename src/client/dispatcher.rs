//! Bounded-concurrency chunk upload dispatcher.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::error::{ClientError, ClientResult};
use crate::client::progress::{ProgressCallback, ProgressUpdate};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            retry_max_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    upload_id: String,
    should_chunk: bool,
    chunk_size: u64,
    #[allow(dead_code)]
    total_chunks: u64,
    received_chunks: Vec<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChunkResponse {
    Complete { #[allow(dead_code)] complete: bool, path: String },
    Progress { #[allow(dead_code)] progress: f64, received: u64, total: u64 },
}

/// Uploads one file to a chunked-upload server over HTTP.
pub struct Dispatcher {
    http: HttpClient,
    base_url: String,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(base_url: impl Into<String>, config: DispatcherConfig) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into(),
            config,
        }
    }

    /// Uploads `path`, reporting progress through `progress` and honoring
    /// `cancel_token`. Returns the server-assigned final path on success.
    pub async fn upload_file<P: ProgressCallback>(
        &self,
        path: &Path,
        mime_type: Option<&str>,
        progress: &P,
        cancel_token: &CancellationToken,
    ) -> ClientResult<String> {
        let metadata = tokio::fs::metadata(path).await?;
        let size = metadata.len();
        let file_hash = hash_file(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let mime_type = mime_type
            .map(str::to_string)
            .unwrap_or_else(|| mime_guess::from_path(path).first_or_octet_stream().to_string());

        let initiate: InitiateResponse = self
            .http
            .post(format!("{}/initiate", self.base_url))
            .json(&serde_json::json!({
                "name": name,
                "type": mime_type,
                "size": size,
                "hash": file_hash,
            }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| ClientError::InitiateFailed(e.to_string()))?
            .json()
            .await?;

        if !initiate.should_chunk {
            return Err(ClientError::InitiateFailed(
                "server declined to chunk this file".into(),
            ));
        }

        let total_chunks = div_ceil(size, initiate.chunk_size);
        let pending = pending_chunks(total_chunks, &initiate.received_chunks);

        let uploaded_so_far = AtomicU64::new(
            (total_chunks - pending.len() as u64) * initiate.chunk_size,
        );
        let final_path = std::sync::Mutex::new(None::<String>);

        let path = Arc::new(path.to_path_buf());
        let upload_id = Arc::new(initiate.upload_id);

        let results = stream::iter(pending.into_iter().map(|index| {
            let path = Arc::clone(&path);
            let upload_id = Arc::clone(&upload_id);
            async move {
                self.upload_chunk_with_retry(
                    &path,
                    &upload_id,
                    index,
                    initiate.chunk_size,
                    size,
                    cancel_token,
                )
                .await
            }
        }))
        .buffer_unordered(self.config.max_concurrent)
        .collect::<Vec<_>>()
        .await;

        for result in results {
            let outcome = result?;
            match outcome {
                ChunkResponse::Complete { path: final_name, .. } => {
                    *final_path.lock().unwrap() = Some(final_name);
                }
                ChunkResponse::Progress { received, total, .. } => {
                    let loaded = uploaded_so_far.fetch_add(initiate.chunk_size, Ordering::Relaxed)
                        + initiate.chunk_size;
                    progress.on_progress(ProgressUpdate::new(
                        size,
                        loaded.min(size),
                        None,
                        total,
                    ));
                    debug!(received, total, "chunk accepted");
                }
            }
        }

        final_path
            .into_inner()
            .unwrap()
            .ok_or_else(|| ClientError::InitiateFailed("upload never reached completion".into()))
    }

    async fn upload_chunk_with_retry(
        &self,
        path: &Path,
        upload_id: &str,
        index: u64,
        chunk_size: u64,
        file_size: u64,
        cancel_token: &CancellationToken,
    ) -> ClientResult<ChunkResponse> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if cancel_token.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            if attempt > 0 {
                let delay = self.retry_delay(attempt);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel_token.cancelled() => return Err(ClientError::Cancelled),
                }
            }

            let offset = index * chunk_size;
            let len = chunk_size.min(file_size.saturating_sub(offset));
            let bytes = match read_range(path, offset, len).await {
                Ok(b) => b,
                Err(e) => return Err(e),
            };
            let hash = hex::encode(Sha256::digest(&bytes));

            match self.post_chunk(upload_id, index, bytes, &hash).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if !e.is_retryable() || attempt == self.config.max_retries {
                        warn!(chunk = index, error = %e, "chunk upload failed permanently");
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(ClientError::MaxRetriesExceeded {
            chunk_index: index,
            max_retries: self.config.max_retries,
        }))
    }

    async fn post_chunk(
        &self,
        upload_id: &str,
        index: u64,
        bytes: Vec<u8>,
        hash: &str,
    ) -> ClientResult<ChunkResponse> {
        let form = Form::new()
            .text("upload_id", upload_id.to_string())
            .text("chunk_index", index.to_string())
            .text("chunk_hash", hash.to_string())
            .part("chunk_data", Part::bytes(bytes));

        let resp = self
            .http
            .post(format!("{}/chunks", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Err(ClientError::HashMismatch { chunk_index: index });
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::ChunkUploadFailed {
                chunk_index: index,
                message: format!("{status}: {body}"),
            });
        }

        resp.json::<ChunkResponse>().await.map_err(ClientError::from)
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay.as_millis() as u64;
        let delay_ms = base.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(delay_ms).min(self.config.retry_max_delay)
    }
}

async fn read_range(path: &Path, offset: u64, len: u64) -> ClientResult<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn hash_file(path: &Path) -> ClientResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> ClientResult<String> {
        use std::io::Read;
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    })
    .await
    .map_err(|e| ClientError::FileReadError(e.to_string()))?
}

fn div_ceil(a: u64, b: u64) -> u64 {
    if b == 0 {
        0
    } else {
        (a + b - 1) / b
    }
}

/// Chunk indices the client still needs to send. Resuming re-sends the
/// most recently acknowledged chunk even though the server already has it,
/// in case its write was torn by a crash between the positioned write and
/// the session update landing.
fn pending_chunks(total_chunks: u64, received_chunks: &[u64]) -> Vec<u64> {
    let mut pending: Vec<u64> = (0..total_chunks)
        .filter(|i| !received_chunks.contains(i))
        .collect();

    if let Some(&last_received) = received_chunks.iter().max() {
        pending.push(last_received);
        pending.sort_unstable();
    }

    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        let dispatcher = Dispatcher::new(
            "http://example.test",
            DispatcherConfig {
                max_concurrent: 1,
                max_retries: 20,
                retry_base_delay: Duration::from_millis(100),
                retry_max_delay: Duration::from_secs(2),
            },
        );
        assert_eq!(dispatcher.retry_delay(0), Duration::from_millis(100));
        assert_eq!(dispatcher.retry_delay(1), Duration::from_millis(200));
        assert_eq!(dispatcher.retry_delay(10), Duration::from_secs(2));
    }

    #[test]
    fn pending_chunks_resends_the_last_received_index() {
        // received_chunks=[0,2] out of 4 total: chunk 1 and 3 are genuinely
        // missing, and 2 (the highest acknowledged index) is re-sent too.
        let pending = pending_chunks(4, &[0, 2]);
        assert_eq!(pending, vec![1, 2, 3]);
    }

    #[test]
    fn pending_chunks_on_a_fresh_upload_sends_everything_once() {
        let pending = pending_chunks(3, &[]);
        assert_eq!(pending, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn read_range_returns_the_requested_slice() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let slice = read_range(&path, 3, 4).await.unwrap();
        assert_eq!(slice, b"3456");
    }
}
