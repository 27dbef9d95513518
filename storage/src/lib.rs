//! # Storage backends
//!
//! Configuration and unification for the storage backends.

use std::sync::Arc;

use camino::Utf8Path;
#[cfg(feature = "local")]
use camino::Utf8PathBuf;
use serde::Deserialize;
use tokio::io;

#[cfg(feature = "local")]
pub(crate) mod local;

pub(crate) mod memory;
#[cfg(feature = "tmp")]
pub(crate) mod temp;

#[cfg(feature = "local")]
#[doc(inline)]
pub use local::LocalDriver;

#[doc(inline)]
pub use memory::MemoryStorage;

#[cfg(feature = "tmp")]
#[doc(inline)]
pub use temp::TempDriver;

#[doc(inline)]
pub use storage_driver::{Driver, Metadata, StorageError, StorageErrorKind};

/// Storage backend selection, as read from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageConfig {
    /// In-process storage, lost on exit.
    Memory {
        /// Bucket created up-front.
        bucket: String,
    },

    /// Files below a local directory.
    #[cfg(feature = "local")]
    Local {
        /// Root directory.
        path: Utf8PathBuf,
    },

    /// Files below a temporary directory, removed on drop.
    #[cfg(feature = "tmp")]
    Temp,
}

impl StorageConfig {
    /// Construct the configured storage backend.
    #[tracing::instrument]
    pub async fn build(self) -> Result<Storage, StorageError> {
        let client: Storage = match self {
            StorageConfig::Memory { bucket } => MemoryStorage::with_buckets(&[&bucket]).into(),
            #[cfg(feature = "local")]
            StorageConfig::Local { path } => LocalDriver::new(path).into(),
            #[cfg(feature = "tmp")]
            StorageConfig::Temp => TempDriver::new()
                .map_err(|err| StorageError::io("temp", err))?
                .into(),
        };
        Ok(client)
    }
}

pub(crate) type ArcDriver = Arc<dyn Driver + Send + Sync>;

/// A cloneable handle to a storage driver.
#[derive(Debug, Clone)]
pub struct Storage {
    driver: ArcDriver,
}

impl<D> From<D> for Storage
where
    D: Driver + Send + Sync + 'static,
{
    fn from(value: D) -> Self {
        Storage::new(value)
    }
}

impl Storage {
    /// Wrap a driver.
    pub fn new<D: Driver + Send + Sync + 'static>(driver: D) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }

    /// The name of the underlying driver.
    pub fn name(&self) -> &str {
        self.driver.name()
    }

    /// A handle scoped to a single bucket.
    pub fn bucket<S: Into<String>>(&self, bucket: S) -> StorageBucket {
        StorageBucket {
            driver: self.driver.clone(),
            bucket: bucket.into(),
        }
    }

    /// Get file metadata.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn metadata(
        &self,
        bucket: &str,
        remote: &Utf8Path,
    ) -> Result<Metadata, StorageError> {
        self.driver.metadata(bucket, remote).await
    }

    /// Download a file into a writer.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name()))]
    pub async fn download<'d, W>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {bucket}/{remote}");
        self.driver.download(bucket, remote, writer).await
    }

    /// Upload a file from a reader.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name()))]
    pub async fn upload<'d, R>(
        &'d self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {bucket}/{remote}");
        self.driver.upload(bucket, remote, reader).await
    }

    /// List files, optionally below a prefix.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.driver.list(bucket, prefix).await
    }

    /// Delete a file.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name()))]
    pub async fn delete(&self, bucket: &str, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(bucket, path).await
    }
}

/// A storage handle bound to one bucket.
#[derive(Debug, Clone)]
pub struct StorageBucket {
    /// The bucket name.
    pub bucket: String,
    driver: ArcDriver,
}

impl StorageBucket {
    /// The name of the underlying driver.
    pub fn name(&self) -> &'static str {
        self.driver.name()
    }

    /// Get file metadata.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn metadata(&self, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.driver.metadata(&self.bucket, remote).await
    }

    /// Whether a file exists. Only `NotFound` counts as absent; other failures propagate.
    pub async fn exists(&self, remote: &Utf8Path) -> Result<bool, StorageError> {
        match self.metadata(remote).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Download a file into a writer.
    #[tracing::instrument(skip(self, writer), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn download<'d, W>(
        &'d self,
        remote: &Utf8Path,
        writer: &mut W,
    ) -> Result<(), StorageError>
    where
        W: io::AsyncWrite + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Downloading from: {}/{remote}", self.bucket);
        self.driver.download(&self.bucket, remote, writer).await
    }

    /// Download a whole file into memory, or `None` if it does not exist.
    pub async fn read(&self, remote: &Utf8Path) -> Result<Option<Vec<u8>>, StorageError> {
        let mut data = Vec::new();
        match self.download(remote, &mut data).await {
            Ok(()) => Ok(Some(data)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Upload a file from a reader.
    #[tracing::instrument(skip(self, reader), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn upload<'d, R>(
        &'d self,
        remote: &Utf8Path,
        reader: &mut R,
    ) -> Result<(), StorageError>
    where
        R: io::AsyncBufRead + Unpin + Send + Sync + 'd,
    {
        tracing::trace!(%remote, "Uploading to: {}/{remote}", self.bucket);
        self.driver.upload(&self.bucket, remote, reader).await
    }

    /// Upload a small in-memory value.
    pub async fn write(&self, remote: &Utf8Path, data: &[u8]) -> Result<(), StorageError> {
        let mut reader = data;
        self.upload(remote, &mut reader).await
    }

    /// List files, optionally below a prefix.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn list(&self, prefix: Option<&Utf8Path>) -> Result<Vec<String>, StorageError> {
        self.driver.list(&self.bucket, prefix).await
    }

    /// Move a file, replacing the destination.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn rename(&self, from: &Utf8Path, to: &Utf8Path) -> Result<(), StorageError> {
        self.driver.rename(&self.bucket, from, to).await
    }

    /// Delete a file.
    #[tracing::instrument(skip(self), fields(driver=self.driver.name(), bucket=self.bucket))]
    pub async fn delete(&self, path: &Utf8Path) -> Result<(), StorageError> {
        self.driver.delete(&self.bucket, path).await
    }
}
