use std::{fmt, ops::Deref, sync::Arc};

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use tokio::io;

use crate::error::StorageError;

/// A reader stream for file contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for file contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// File object metadata, which will be generically provided by the driver.
///
/// This struct only provides common metadata fields, and drivers may provide more specific
/// metadata fields directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the file in bytes.
    pub size: u64,

    /// The creation timestamp of the file.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides the ability to interact with a storage backend.
///
/// Drivers must replace the content of a key atomically: a concurrent reader sees
/// either the previous content or the new content, never a partial write.
#[async_trait::async_trait]
pub trait Driver: fmt::Debug + Send + Sync {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// The Uri scheme of the driver.
    fn scheme(&self) -> &str;

    /// Delete a file from the storage, by path.
    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Get the metadata for a file, by path.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Upload a file to the storage, using a reader stream to provide the contents.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Download a file from storage, into a writer stream.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// List the files in a bucket, optionally filtered by a prefix.
    ///
    /// The prefix matches whole path components, and the returned entries are
    /// full paths within the bucket.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;

    /// Move a file to a new path, replacing anything already stored there.
    ///
    /// The default implementation copies the content and then deletes the source,
    /// which is only as atomic as `upload`. Drivers with a native rename should
    /// override it.
    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        tracing::trace!(%from, %to, "Renaming by copy: {bucket}/{from}");
        let mut buffer = Vec::new();
        self.download(bucket, from, &mut buffer).await?;
        let mut reader: &[u8] = &buffer;
        self.upload(bucket, to, &mut reader).await?;
        self.delete(bucket, from).await
    }
}

#[async_trait::async_trait]
impl<D> Driver for Arc<D>
where
    D: ?Sized + Driver + 'static,
{
    fn name(&self) -> &'static str {
        self.deref().name()
    }

    fn scheme(&self) -> &str {
        self.deref().scheme()
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.deref().delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.deref().metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        self.deref().upload(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.deref().download(bucket, remote, writer).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.deref().list(bucket, prefix).await
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        self.deref().rename(bucket, from, to).await
    }
}
