use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{Instrument, Span};

use crate::config::{EngineConfig, DEFAULT_UPLOAD_CHUNK_SIZE};
use crate::errors::{LauncherError, Result};
use crate::services::api_client::{ensure_success, ApiClient};
use crate::services::install_queue::QueueItem;
use crate::services::upload_service::{upload_in_chunks, ChunkTransport, UploadChunk};
use crate::utils::cancellation::CancellationHandle;
use crate::utils::retry::RetryPolicy;

const UPLOAD_SESSIONS_PATH: &str = "uploads";
const UPLOADED_BYTES_HEADER: &str = "x-uploaded-bytes";
const PARTIAL_SUFFIX: &str = ".part";

/// Fetches content bytes into a local file, reporting progress on the queue item.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_to_file(&self, url: &str, destination: &Path, item: &QueueItem) -> Result<u64>;
}

#[derive(Serialize)]
struct BeginUploadRequest {
    kind: &'static str,
}

#[derive(Deserialize)]
struct BeginUploadResponse {
    key: String,
}

#[derive(Clone)]
pub struct TransferService {
    api: ApiClient,
    chunk_size: usize,
    retry: RetryPolicy,
    span: Span,
}

impl TransferService {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            span: tracing::info_span!("transfer"),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(ApiClient::from_config(config))
            .with_chunk_size(config.upload_chunk_size)
            .with_retry_policy(config.retry_policy())
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Uploads a packed save archive in configured chunks and returns the session key.
    pub async fn upload_file(&self, path: &Path, cancel: Option<&CancellationHandle>) -> Result<String> {
        let file = tokio::fs::File::open(path).await?;
        upload_in_chunks(self, self.chunk_size, file, self.retry, cancel)
            .instrument(self.span.clone())
            .await
    }

    async fn stream_to_file(&self, url: &str, partial: &Path, item: &QueueItem) -> Result<u64> {
        let cancel = item.cancellation();
        cancel.wait_for_running().await?;

        let response = self.api.request_builder(Method::GET, url).send().await?;
        let response = ensure_success(response).await?;
        if let Some(total) = response.content_length() {
            item.set_total_bytes(total as i64);
        }

        if let Some(parent) = partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(partial).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(next) = stream.next().await {
            cancel.wait_for_running().await?;
            let bytes = next?;
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
            item.add_bytes_downloaded(bytes.len() as i64);
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ContentSource for TransferService {
    async fn fetch_to_file(&self, url: &str, destination: &Path, item: &QueueItem) -> Result<u64> {
        let partial = partial_path(destination);
        let result = self
            .stream_to_file(url, &partial, item)
            .instrument(self.span.clone())
            .await;

        match result {
            Ok(written) => {
                tokio::fs::rename(&partial, destination).await?;
                tracing::info!("downloaded {} bytes to {:?}", written, destination);
                Ok(written)
            }
            Err(err) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::debug!("failed to remove partial download {:?}: {}", partial, cleanup);
                    }
                }
                if err.is_cancelled() {
                    tracing::info!("download of {} cancelled", url);
                } else {
                    tracing::warn!("download of {} failed: {}", url, err);
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl ChunkTransport for TransferService {
    async fn begin_upload(&self) -> Result<String> {
        let response: BeginUploadResponse = self
            .api
            .post(UPLOAD_SESSIONS_PATH, BeginUploadRequest { kind: "save" })
            .await?;
        if response.key.trim().is_empty() {
            return Err(LauncherError::Http("upload session key is empty".to_string()));
        }
        Ok(response.key)
    }

    async fn upload_chunk(&self, chunk: &UploadChunk) -> Result<()> {
        let path = format!("{}/{}", UPLOAD_SESSIONS_PATH, chunk.key);
        let response = self
            .api
            .request_builder(Method::PUT, &path)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_RANGE, content_range(chunk))
            .header(UPLOADED_BYTES_HEADER, chunk.uploaded.to_string())
            .body(chunk.data.clone())
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

/// `bytes {start}-{last}/*`; total size is unknown while streaming.
pub fn content_range(chunk: &UploadChunk) -> String {
    format!(
        "bytes {}-{}/*",
        chunk.start,
        chunk.end.saturating_sub(1)
    )
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
