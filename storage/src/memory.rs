use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{
    io::{AsyncReadExt as _, AsyncWriteExt as _},
    sync::RwLock,
};

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

const ENGINE: &str = "memory";

fn bucket_not_found(bucket: &str) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Bucket not found: {bucket}"),
        ),
    )
    .bucket(bucket)
    .context("bucket not found")
    .build()
}

fn path_not_found(bucket: &str, remote: &Utf8Path) -> StorageError {
    StorageError::builder(
        ENGINE,
        StorageErrorKind::NotFound,
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Path not found: {remote}"),
        ),
    )
    .bucket(bucket)
    .path(remote.as_str())
    .context("path not found")
    .build()
}

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = HashMap<Utf8PathBuf, MemoryFileItem>;

/// Storage driver that stores files in memory.
///
/// Uploads are buffered completely before they are inserted, so readers never
/// observe a partially written file.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new `MemoryStorage` instance, with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new `MemoryStorage` instance, with the given buckets.
    pub fn with_buckets(buckets: &[&str]) -> Self {
        let map = buckets
            .iter()
            .map(|bucket| (bucket.to_string(), HashMap::new()))
            .collect();

        Self {
            buckets: RwLock::new(map),
        }
    }

    /// Create a new bucket in the storage.
    pub async fn create_bucket(&self, bucket: String) {
        let mut buckets = self.buckets.write().await;
        buckets.entry(bucket).or_default();
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn scheme(&self) -> &str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let buckets = self.buckets.read().await;
        let files = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
        files
            .get(remote)
            .map(Metadata::from)
            .ok_or_else(|| path_not_found(bucket, remote))
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let files = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        files.remove(remote);
        Ok(())
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let mut buf = Vec::new();
        local
            .read_to_end(&mut buf)
            .await
            .map_err(|err| StorageError::io(ENGINE, err))?;

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        // Copy out under the lock, write without it.
        let data = {
            let buckets = self.buckets.read().await;
            let files = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;
            files
                .get(remote)
                .ok_or_else(|| path_not_found(bucket, remote))?
                .data
                .clone()
        };

        local
            .write_all(&data)
            .await
            .map_err(|err| StorageError::io(ENGINE, err))?;
        local
            .flush()
            .await
            .map_err(|err| StorageError::io(ENGINE, err))?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let files = buckets.get(bucket).ok_or_else(|| bucket_not_found(bucket))?;

        Ok(files
            .keys()
            .filter(|path| prefix.map_or(true, |prefix| path.starts_with(prefix)))
            .map(|path| path.to_string())
            .collect())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().await;
        let files = buckets
            .get_mut(bucket)
            .ok_or_else(|| bucket_not_found(bucket))?;
        let item = files
            .remove(from)
            .ok_or_else(|| path_not_found(bucket, from))?;
        files.insert(to.to_owned(), item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_download_roundtrip() {
        let storage = MemoryStorage::with_buckets(&["b"]);
        let mut reader: &[u8] = b"hello";
        storage
            .upload("b", Utf8Path::new("x/y"), &mut reader)
            .await
            .unwrap();

        let mut out = Vec::new();
        storage
            .download("b", Utf8Path::new("x/y"), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(
            storage
                .metadata("b", Utf8Path::new("x/y"))
                .await
                .unwrap()
                .size,
            5
        );
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let storage = MemoryStorage::with_buckets(&["b"]);
        let err = storage
            .metadata("b", Utf8Path::new("nope"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = storage.list("other", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_matches_whole_components() {
        let storage = MemoryStorage::with_buckets(&["b"]);
        for key in ["tags/foo/1", "tags/foo/2", "tags/foobar/1"] {
            let mut reader: &[u8] = b"";
            storage
                .upload("b", Utf8Path::new(key), &mut reader)
                .await
                .unwrap();
        }

        let mut listed = storage
            .list("b", Some(Utf8Path::new("tags/foo")))
            .await
            .unwrap();
        listed.sort();
        assert_eq!(listed, vec!["tags/foo/1", "tags/foo/2"]);
    }

    #[tokio::test]
    async fn rename_replaces_destination() {
        let storage = MemoryStorage::with_buckets(&["b"]);
        let mut first: &[u8] = b"old";
        storage
            .upload("b", Utf8Path::new("dst"), &mut first)
            .await
            .unwrap();
        let mut second: &[u8] = b"new";
        storage
            .upload("b", Utf8Path::new("tmp"), &mut second)
            .await
            .unwrap();

        storage
            .rename("b", Utf8Path::new("tmp"), Utf8Path::new("dst"))
            .await
            .unwrap();

        let mut out = Vec::new();
        storage
            .download("b", Utf8Path::new("dst"), &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"new");
        assert!(storage
            .metadata("b", Utf8Path::new("tmp"))
            .await
            .unwrap_err()
            .is_not_found());
    }
}
