//! Blob handles and their content streams.

use std::future::Future as _;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use storage::StorageBucket;
use storage_driver::StorageError;
use tokio::io::{self, AsyncBufRead, AsyncRead, AsyncReadExt as _, BufReader, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;

use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::layout::Key;
use crate::proxy::RemoteClient;

/// A stream of blob bytes, consumed once.
pub type BlobReader = Box<dyn AsyncBufRead + Unpin + Send>;

const PIPE_CAPACITY: usize = 64 * 1024;

/// A blob which exists in some store.
///
/// The handle is cheap: content is only read when [`Blob::content`] is called,
/// and each call opens a fresh stream.
#[derive(Debug, Clone)]
pub struct Blob {
    digest: Digest,
    size: u64,
    source: Source,
}

#[derive(Debug, Clone)]
enum Source {
    Storage { bucket: StorageBucket, key: Key },
    Remote { client: RemoteClient, path: String },
    Memory(Bytes),
}

impl Blob {
    /// A blob held in memory. The digest is computed from `data`.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            digest: Digest::sha256(&data),
            size: data.len() as u64,
            source: Source::Memory(data),
        }
    }

    pub(crate) fn in_storage(digest: Digest, size: u64, bucket: StorageBucket, key: Key) -> Self {
        Self {
            digest,
            size,
            source: Source::Storage { bucket, key },
        }
    }

    pub(crate) fn remote(digest: Digest, size: u64, client: RemoteClient, path: String) -> Self {
        Self {
            digest,
            size,
            source: Source::Remote { client, path },
        }
    }

    /// Blob digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Blob size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Open the blob content.
    pub async fn content(&self) -> RegistryResult<BlobReader> {
        match &self.source {
            Source::Memory(data) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
            Source::Storage { bucket, key } => Ok(Box::new(PipeReader::download(
                bucket.clone(),
                key.clone(),
            ))),
            Source::Remote { client, path } => client.stream(path).await,
        }
    }

    /// Read the whole blob into memory.
    pub async fn bytes(&self) -> RegistryResult<Bytes> {
        let mut content = self.content().await?;
        let mut data = Vec::with_capacity(usize::try_from(self.size).unwrap_or_default());
        content.read_to_end(&mut data).await?;
        Ok(data.into())
    }
}

/// Reads a storage download as it is written by a background task.
///
/// A download failure is reported to the reader when it reaches the end of the pipe.
#[pin_project::pin_project]
#[derive(Debug)]
struct PipeReader {
    #[pin]
    inner: BufReader<DuplexStream>,
    task: Option<JoinHandle<Result<(), StorageError>>>,
}

impl PipeReader {
    fn download(bucket: StorageBucket, key: Key) -> Self {
        let (mut tx, rx) = tokio::io::duplex(PIPE_CAPACITY);
        let task = tokio::spawn(async move { bucket.download(key.as_path(), &mut tx).await });
        Self {
            inner: BufReader::new(rx),
            task: Some(task),
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let available = ready!(self.as_mut().poll_fill_buf(cx))?;
        let n = available.len().min(buf.remaining());
        buf.put_slice(&available[..n]);
        self.consume(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncBufRead for PipeReader {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.project();
        let available = ready!(this.inner.poll_fill_buf(cx))?;

        if available.is_empty() {
            if let Some(task) = this.task.as_mut() {
                let outcome = ready!(Pin::new(task).poll(cx));
                *this.task = None;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Poll::Ready(Err(io::Error::other(err))),
                    Err(err) => return Poll::Ready(Err(io::Error::other(err))),
                }
            }
        }

        Poll::Ready(Ok(available))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        self.project().inner.consume(amt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{MemoryStorage, Storage};

    use crate::layout::Layout;

    #[tokio::test]
    async fn memory_blob() {
        let blob = Blob::from_bytes(&b"data"[..]);
        assert_eq!(blob.size(), 4);
        assert_eq!(blob.digest(), &Digest::sha256(b"data"));
        assert_eq!(blob.bytes().await.unwrap(), Bytes::from_static(b"data"));
        // Content can be opened more than once.
        assert_eq!(blob.bytes().await.unwrap(), Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn storage_blob_streams() {
        let storage: Storage = MemoryStorage::with_buckets(&["b"]).into();
        let bucket = storage.bucket("b");
        let data = vec![7u8; PIPE_CAPACITY * 3 + 11];
        let digest = Digest::sha256(&data);
        let key = Layout::default().blob(&digest);
        bucket.write(key.as_path(), &data).await.unwrap();

        let blob = Blob::in_storage(digest.clone(), data.len() as u64, bucket, key);
        let content = blob.content().await.unwrap();
        assert_eq!(Digest::from_content(content).await.unwrap(), digest);
    }

    #[tokio::test]
    async fn storage_failure_reaches_the_reader() {
        let storage: Storage = MemoryStorage::with_buckets(&["b"]).into();
        let bucket = storage.bucket("b");
        let key = Layout::default().blob(&Digest::sha256(b"missing"));
        assert!(!bucket.exists(key.as_path()).await.unwrap());

        let blob = Blob::in_storage(Digest::sha256(b"missing"), 7, bucket, key);
        let err = blob.bytes().await.unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");
    }
}
