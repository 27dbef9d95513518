use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use eyre::Context;
use tokio::io::AsyncWriteExt;
use tracing::Instrument;

use storage_driver::{Driver, Metadata, Reader, StorageError, StorageErrorKind, Writer};

const ENGINE: &str = "local";

static STAGING: AtomicU64 = AtomicU64::new(0);

/// Storage driver which keeps files below a directory on the local filesystem,
/// at `<root>/<bucket>/b/<path>`.
///
/// Uploads are staged in `<root>/<bucket>/uploads/` and renamed into place, so
/// listings never include a partially written file.
#[derive(Debug)]
pub struct LocalDriver {
    root: Utf8PathBuf,
}

impl LocalDriver {
    /// Create a driver rooted at `root`.
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn bucket_root(&self, bucket: &str) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("b");
        path
    }

    fn staging(&self, bucket: &str) -> Utf8PathBuf {
        let mut path = self.root.join(bucket);
        path.push("uploads");
        path.push(format!(
            "{}-{}",
            std::process::id(),
            STAGING.fetch_add(1, Ordering::Relaxed)
        ));
        path
    }

    fn path(&self, bucket: &str, remote: &Utf8Path) -> Utf8PathBuf {
        self.bucket_root(bucket).join(remote)
    }

    async fn create_parent(&self, path: &Utf8Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io(ENGINE, err))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Driver for LocalDriver {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn scheme(&self) -> &str {
        "local"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        let path = self.path(bucket, remote);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|err| StorageError::io(ENGINE, err))?;
        if metadata.is_dir() {
            return Err(StorageError::builder(
                ENGINE,
                StorageErrorKind::NotFound,
                std::io::Error::new(std::io::ErrorKind::NotFound, "path is a directory"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build());
        }

        Ok(Metadata {
            size: metadata.len(),
            created: metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(|err| StorageError::io(ENGINE, err))?
                .into(),
        })
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(ENGINE, err)),
        }
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);
        self.create_parent(&path).await?;

        let staging = self.staging(bucket);
        self.create_parent(&staging).await?;
        let mut writer = tokio::io::BufWriter::new(
            tokio::fs::File::create(&staging)
                .await
                .map_err(|err| StorageError::io(ENGINE, err))?,
        );

        let copied = async {
            tokio::io::copy(local, &mut writer).await?;
            writer.shutdown().await
        }
        .await;

        if let Err(err) = copied {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(StorageError::builder(ENGINE, StorageErrorKind::Io, err)
                .bucket(bucket)
                .path(remote.as_str())
                .context("write file")
                .build());
        }

        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|err| StorageError::io(ENGINE, err))
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        let path = self.path(bucket, remote);

        let mut reader = tokio::io::BufReader::new(
            tokio::fs::File::open(&path)
                .await
                .map_err(|err| StorageError::io(ENGINE, err))?,
        );

        tokio::io::copy(&mut reader, local)
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
        let root = self.bucket_root(bucket);
        let start = match prefix {
            Some(prefix) => root.join(prefix),
            None => root.clone(),
        };

        let items = tokio::task::spawn_blocking(move || collect_list(&root, &start))
            .in_current_span()
            .await
            .map_err(StorageError::with(ENGINE, StorageErrorKind::Other))?
            .map_err(|err| StorageError::new(ENGINE, StorageErrorKind::Io, err))?;

        tracing::debug!("Found {} entries", items.len());
        Ok(items.into_iter().map(|p| p.to_string()).collect())
    }

    async fn rename(
        &self,
        bucket: &str,
        from: &Utf8Path,
        to: &Utf8Path,
    ) -> Result<(), StorageError> {
        let destination = self.path(bucket, to);
        self.create_parent(&destination).await?;
        tokio::fs::rename(self.path(bucket, from), destination)
            .await
            .map_err(|err| StorageError::io(ENGINE, err))
    }
}

/// Every file below `start`, relative to `root`. A missing `start` lists nothing.
#[tracing::instrument]
fn collect_list(root: &Utf8Path, start: &Utf8Path) -> eyre::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();

    if start.is_file() {
        files.push(start.to_owned());
    } else if start.is_dir() {
        visit(start, &mut files)?;
    }

    files
        .into_iter()
        .map(|p| {
            p.strip_prefix(root)
                .map(|p| p.to_owned())
                .wrap_err_with(|| format!("{p} is outside of {root}"))
        })
        .collect()
}

fn visit(path: &Utf8Path, files: &mut Vec<Utf8PathBuf>) -> eyre::Result<()> {
    for entry in path
        .read_dir_utf8()
        .wrap_err_with(|| format!("read directory {path}"))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            visit(entry.path(), files)?;
        } else {
            files.push(entry.path().to_owned())
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> (tempfile::TempDir, LocalDriver) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap().to_owned();
        (dir, LocalDriver::new(root))
    }

    #[tokio::test]
    async fn upload_list_rename() {
        let (_dir, driver) = driver();

        for key in ["manifests/a/tags/1/current/link", "manifests/a/tags/2/current/link"] {
            let mut reader: &[u8] = b"sha256:00";
            driver
                .upload("reg", Utf8Path::new(key), &mut reader)
                .await
                .unwrap();
        }

        let mut listed = driver
            .list("reg", Some(Utf8Path::new("manifests/a/tags")))
            .await
            .unwrap();
        listed.sort();
        assert_eq!(
            listed,
            vec![
                "manifests/a/tags/1/current/link",
                "manifests/a/tags/2/current/link"
            ]
        );

        driver
            .rename(
                "reg",
                Utf8Path::new("manifests/a/tags/1/current/link"),
                Utf8Path::new("moved/link"),
            )
            .await
            .unwrap();
        assert_eq!(
            driver
                .metadata("reg", Utf8Path::new("moved/link"))
                .await
                .unwrap()
                .size,
            9
        );
        assert!(driver
            .metadata("reg", Utf8Path::new("manifests/a/tags/1/current/link"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn upload_in_flight_is_not_listed() {
        let (_dir, driver) = driver();
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut rx = tokio::io::BufReader::new(rx);

        let upload = driver.upload("reg", Utf8Path::new("tags/foo/latest"), &mut rx);
        let check = async {
            tx.write_all(b"sha256:").await.unwrap();
            let uploads = driver.root.join("reg").join("uploads");
            while std::fs::read_dir(&uploads).map_or(0, |entries| entries.count()) == 0 {
                tokio::task::yield_now().await;
            }

            for prefix in [None, Some(Utf8Path::new("tags/foo"))] {
                let listed = driver.list("reg", prefix).await.unwrap();
                assert!(listed.is_empty(), "listed {listed:?}");
            }

            tx.write_all(b"00").await.unwrap();
            drop(tx);
        };

        let (uploaded, ()) = tokio::join!(upload, check);
        uploaded.unwrap();

        assert_eq!(
            driver.list("reg", Some(Utf8Path::new("tags/foo"))).await.unwrap(),
            vec!["tags/foo/latest"]
        );
    }

    #[tokio::test]
    async fn missing_prefix_lists_nothing() {
        let (_dir, driver) = driver();
        let listed = driver
            .list("reg", Some(Utf8Path::new("nothing/here")))
            .await
            .unwrap();
        assert!(listed.is_empty());

        let mut out = Vec::new();
        let err = driver
            .download("reg", Utf8Path::new("nothing/here"), &mut out)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
