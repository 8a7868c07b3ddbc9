use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::Instrument;

use crate::errors::{LauncherError, Result};
use crate::utils::cancellation::CancellationHandle;
use crate::utils::retry::{try_with_retry_async, RetryPolicy};

/// One slice of an upload, covering bytes `[start, end)` of the source stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadChunk {
    pub key: String,
    pub start: u64,
    pub end: u64,
    /// Bytes sent so far, this chunk included.
    pub uploaded: u64,
    pub data: Vec<u8>,
}

impl UploadChunk {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Opens an upload session and returns its key.
    async fn begin_upload(&self) -> Result<String>;

    async fn upload_chunk(&self, chunk: &UploadChunk) -> Result<()>;
}

/// Streams `reader` to the transport in `chunk_size` pieces and returns the session key.
///
/// Each chunk is retried under `policy`; the first chunk that still fails aborts the
/// upload with [`LauncherError::Upload`] carrying the key and the chunk's offset.
pub async fn upload_in_chunks<T, R>(
    transport: &T,
    chunk_size: usize,
    reader: R,
    policy: RetryPolicy,
    cancel: Option<&CancellationHandle>,
) -> Result<String>
where
    T: ChunkTransport + ?Sized,
    R: AsyncRead + Unpin,
{
    if chunk_size == 0 {
        return Err(LauncherError::InvalidArgument(
            "upload chunk size must be positive".to_string(),
        ));
    }

    let key = try_with_retry_async(policy, || transport.begin_upload()).await?;
    if key.trim().is_empty() {
        return Err(LauncherError::Http("upload session key is empty".to_string()));
    }

    let span = tracing::info_span!("upload", key = %key);
    send_chunks(transport, chunk_size, reader, policy, cancel, &key)
        .instrument(span)
        .await?;
    Ok(key)
}

async fn send_chunks<T, R>(
    transport: &T,
    chunk_size: usize,
    mut reader: R,
    policy: RetryPolicy,
    cancel: Option<&CancellationHandle>,
    key: &str,
) -> Result<()>
where
    T: ChunkTransport + ?Sized,
    R: AsyncRead + Unpin,
{
    let mut offset = 0u64;
    let mut buffer = vec![0u8; chunk_size];
    loop {
        if let Some(cancel) = cancel {
            cancel
                .wait_for_running()
                .await
                .map_err(|err| upload_error(key, offset, err))?;
        }

        let filled = read_chunk(&mut reader, &mut buffer)
            .await
            .map_err(|err| upload_error(key, offset, err.into()))?;
        if filled == 0 {
            break;
        }

        let end = offset + filled as u64;
        let chunk = UploadChunk {
            key: key.to_string(),
            start: offset,
            end,
            uploaded: end,
            data: buffer[..filled].to_vec(),
        };
        let chunk_ref = &chunk;
        try_with_retry_async(policy, move || transport.upload_chunk(chunk_ref))
            .await
            .map_err(|err| upload_error(key, offset, err))?;
        tracing::debug!("uploaded bytes {}..{}", chunk.start, chunk.end);

        offset = end;
        if filled < chunk_size {
            break;
        }
    }

    tracing::info!("upload complete: {} bytes", offset);
    Ok(())
}

/// Fills `buffer` unless the stream ends first.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = reader.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn upload_error(key: &str, offset: u64, source: LauncherError) -> LauncherError {
    LauncherError::Upload {
        key: key.to_string(),
        offset,
        source: Box::new(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTransport {
        chunks: Mutex<Vec<UploadChunk>>,
        fail_at_offset: Option<u64>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl ChunkTransport for RecordingTransport {
        async fn begin_upload(&self) -> Result<String> {
            Ok("session-1".to_string())
        }

        async fn upload_chunk(&self, chunk: &UploadChunk) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail_at_offset == Some(chunk.start) {
                return Err(LauncherError::Http("HTTP 503: busy".to_string()));
            }
            self.chunks
                .lock()
                .expect("chunks lock")
                .push(chunk.clone());
            Ok(())
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::ZERO)
    }

    #[tokio::test]
    async fn chunks_cover_the_stream_with_short_tail() {
        let transport = RecordingTransport::default();
        let payload: Vec<u8> = (0..10u8).collect();

        let key = upload_in_chunks(&transport, 4, payload.as_slice(), policy(), None)
            .await
            .expect("upload");

        assert_eq!(key, "session-1");
        let chunks = transport.chunks.lock().expect("chunks lock");
        let ranges: Vec<(u64, u64, u64)> = chunks
            .iter()
            .map(|chunk| (chunk.start, chunk.end, chunk.uploaded))
            .collect();
        assert_eq!(ranges, vec![(0, 4, 4), (4, 8, 8), (8, 10, 10)]);
        assert_eq!(chunks[2].data, vec![8, 9]);
        assert!(chunks.iter().all(|chunk| chunk.key == "session-1"));
    }

    #[tokio::test]
    async fn exact_multiple_sends_no_empty_chunk() {
        let transport = RecordingTransport::default();
        let payload = vec![7u8; 8];

        upload_in_chunks(&transport, 4, payload.as_slice(), policy(), None)
            .await
            .expect("upload");

        let chunks = transport.chunks.lock().expect("chunks lock");
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|chunk| !chunk.is_empty()));
    }

    #[tokio::test]
    async fn failed_chunk_is_typed_with_key_and_offset() {
        let transport = RecordingTransport {
            fail_at_offset: Some(4),
            ..Default::default()
        };
        let payload = vec![1u8; 12];

        let err = upload_in_chunks(&transport, 4, payload.as_slice(), policy(), None)
            .await
            .expect_err("upload must fail");

        match err {
            LauncherError::Upload { key, offset, source } => {
                assert_eq!(key, "session-1");
                assert_eq!(offset, 4);
                assert!(matches!(*source, LauncherError::Http(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        // one successful chunk, then three attempts at the failing one
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(transport.chunks.lock().expect("chunks lock").len(), 1);
    }

    #[tokio::test]
    async fn cancelled_upload_reports_cancellation() {
        let transport = RecordingTransport::default();
        let cancel = CancellationHandle::new();
        cancel.cancel();

        let err = upload_in_chunks(&transport, 4, &[1u8, 2, 3][..], policy(), Some(&cancel))
            .await
            .expect_err("cancelled");

        assert!(err.is_cancelled());
        assert!(transport.chunks.lock().expect("chunks lock").is_empty());
    }

    #[tokio::test]
    async fn zero_chunk_size_is_rejected() {
        let transport = RecordingTransport::default();
        let result = upload_in_chunks(&transport, 0, &[1u8][..], policy(), None).await;
        assert!(matches!(result, Err(LauncherError::InvalidArgument(_))));
    }
}
