//! Registry content kept in a storage bucket.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use futures::TryFutureExt as _;
use storage::StorageBucket;
use tokio::io::{AsyncWriteExt as _, BufReader};
use uuid::Uuid;

use crate::blob::{Blob, BlobReader};
use crate::digest::{Digest, DigestReader};
use crate::error::{RegistryError, RegistryResult};
use crate::layout::{Key, Layout};
use crate::manifest::Manifest;
use crate::name::{ManifestRef, RepoName, Tag};
use crate::page::{Catalog, Tags};
use crate::store::{Blobs, Manifests, Registry, Repo};

const UPLOAD_PIPE: usize = 64 * 1024;

/// A registry stored in one bucket, with keys placed by a [`Layout`].
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    bucket: StorageBucket,
    layout: Arc<Layout>,
}

impl LocalRegistry {
    /// Registry content in `bucket`.
    pub fn new(bucket: StorageBucket, layout: Layout) -> Self {
        Self {
            bucket,
            layout: Arc::new(layout),
        }
    }

    /// The blob store. Blobs are shared between every repository of the registry.
    pub fn blobs(&self) -> LocalBlobs {
        LocalBlobs {
            bucket: self.bucket.clone(),
            layout: self.layout.clone(),
        }
    }

    /// The manifest store of repository `name`.
    pub fn manifests(&self, name: &RepoName) -> LocalManifests {
        LocalManifests {
            name: name.clone(),
            blobs: self.blobs(),
        }
    }
}

#[async_trait::async_trait]
impl Registry for LocalRegistry {
    fn repo(&self, name: &RepoName) -> Repo {
        Repo {
            name: name.clone(),
            blobs: Arc::new(self.blobs()),
            manifests: Arc::new(self.manifests(name)),
        }
    }

    #[tracing::instrument(skip(self), fields(bucket = %self.bucket.bucket))]
    async fn catalog(
        &self,
        from: Option<&RepoName>,
        limit: Option<usize>,
    ) -> RegistryResult<Catalog> {
        let root = self.layout.repositories();
        let keys = list_or_empty(&self.bucket, &root).await?;
        let names = keys
            .iter()
            .filter_map(|key| self.layout.repository_from_key(key));
        Ok(Catalog::page(names, from, limit))
    }
}

async fn list_or_empty(bucket: &StorageBucket, prefix: &Key) -> RegistryResult<Vec<String>> {
    match bucket.list(Some(prefix.as_path())).await {
        Ok(keys) => Ok(keys),
        Err(err) if err.is_not_found() => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// Blobs in a storage bucket.
#[derive(Debug, Clone)]
pub struct LocalBlobs {
    bucket: StorageBucket,
    layout: Arc<Layout>,
}

impl LocalBlobs {
    /// Copy `content` to `key`, hashing it on the way.
    async fn stage(&self, content: BlobReader, key: &Key) -> RegistryResult<(u64, Digest)> {
        let (mut tx, rx) = tokio::io::duplex(UPLOAD_PIPE);
        let mut reader = DigestReader::new(content);
        let mut rx = BufReader::new(rx);

        let feed = async {
            tokio::io::copy(&mut reader, &mut tx).await?;
            tx.shutdown().await
        };
        let store = self.bucket.upload(key.as_path(), &mut rx);

        tokio::try_join!(
            feed.map_err(RegistryError::from),
            store.map_err(RegistryError::from)
        )?;

        Ok((reader.bytes_read(), reader.digest()))
    }

    fn blob(&self, digest: Digest, size: u64, key: Key) -> Blob {
        Blob::in_storage(digest, size, self.bucket.clone(), key)
    }
}

#[async_trait::async_trait]
impl Blobs for LocalBlobs {
    #[tracing::instrument(skip(self, content), fields(bucket = %self.bucket.bucket, %digest))]
    async fn put(&self, content: BlobReader, digest: &Digest) -> RegistryResult<Blob> {
        let upload = self.layout.upload(Uuid::new_v4());

        let (size, computed) = match self.stage(content, &upload).await {
            Ok(staged) => staged,
            Err(err) => {
                if let Err(cleanup) = self.bucket.delete(upload.as_path()).await {
                    tracing::warn!(%upload, "Failed to remove partial upload: {cleanup}");
                }
                return Err(err);
            }
        };

        if computed != *digest {
            if let Err(cleanup) = self.bucket.delete(upload.as_path()).await {
                tracing::warn!(%upload, "Failed to remove rejected upload: {cleanup}");
            }
            return Err(RegistryError::DigestMismatch {
                expected: digest.clone(),
                computed,
            });
        }

        let key = self.layout.blob(digest);
        if self.bucket.exists(key.as_path()).await? {
            tracing::trace!(%key, "Blob already stored");
            self.bucket.delete(upload.as_path()).await?;
        } else {
            self.bucket.rename(upload.as_path(), key.as_path()).await?;
        }

        Ok(self.blob(computed, size, key))
    }

    #[tracing::instrument(skip(self, blob), fields(bucket = %self.bucket.bucket, digest = %blob.digest()))]
    async fn mount(&self, blob: &Blob) -> RegistryResult<Blob> {
        if let Some(existing) = self.get(blob.digest()).await? {
            return Ok(existing);
        }
        self.put(blob.content().await?, blob.digest()).await
    }

    #[tracing::instrument(skip(self), fields(bucket = %self.bucket.bucket, %digest))]
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        let key = self.layout.blob(digest);
        match self.bucket.metadata(key.as_path()).await {
            Ok(metadata) => Ok(Some(self.blob(digest.clone(), metadata.size, key))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Manifests of one repository in a storage bucket.
///
/// Manifest bodies are stored as blobs. Each repository keeps a revision link per
/// manifest digest and a link per tag, both holding the manifest digest.
#[derive(Debug, Clone)]
pub struct LocalManifests {
    name: RepoName,
    blobs: LocalBlobs,
}

impl LocalManifests {
    fn bucket(&self) -> &StorageBucket {
        &self.blobs.bucket
    }

    fn layout(&self) -> &Layout {
        &self.blobs.layout
    }

    async fn link(&self, reference: &ManifestRef, digest: &Digest) -> RegistryResult<()> {
        let key = self.layout().manifest(&self.name, reference);
        tracing::trace!(%key, %digest, "Link manifest");
        self.bucket()
            .write(key.as_path(), digest.as_str().as_bytes())
            .await?;
        Ok(())
    }

    async fn register(&self) -> RegistryResult<()> {
        let marker = self.layout().repository(&self.name);
        if !self.bucket().exists(marker.as_path()).await? {
            self.bucket().write(marker.as_path(), b"").await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Manifests for LocalManifests {
    #[tracing::instrument(skip(self, content), fields(repo = %self.name, %reference))]
    async fn put(&self, reference: &ManifestRef, content: Bytes) -> RegistryResult<Manifest> {
        let manifest = Manifest::parse(content)?;
        let digest = manifest.digest();

        if let ManifestRef::Digest(expected) = reference {
            if expected != digest {
                return Err(RegistryError::DigestMismatch {
                    expected: expected.clone(),
                    computed: digest.clone(),
                });
            }
        }

        let body: BlobReader = Box::new(Cursor::new(manifest.body().clone()));
        self.blobs.put(body, digest).await?;

        // Content first, then links: a link never points at a missing manifest.
        self.link(&ManifestRef::Digest(digest.clone()), digest).await?;
        if let ManifestRef::Tag(_) = reference {
            self.link(reference, digest).await?;
        }
        self.register().await?;

        tracing::debug!(%digest, media_type = manifest.media_type(), "Stored manifest");
        Ok(manifest)
    }

    #[tracing::instrument(skip(self), fields(repo = %self.name, %reference))]
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>> {
        let link = self.layout().manifest(&self.name, reference);
        let Some(target) = self.bucket().read(link.as_path()).await? else {
            return Ok(None);
        };

        let digest: Digest = String::from_utf8_lossy(&target).trim().parse()?;
        let Some(blob) = self.blobs.get(&digest).await? else {
            tracing::warn!(%link, %digest, "Manifest link points at a missing blob");
            return Ok(None);
        };

        let body = blob.bytes().await?;
        Manifest::with_digest(digest, body).map(Some)
    }

    #[tracing::instrument(skip(self), fields(repo = %self.name))]
    async fn tags(&self, from: Option<&Tag>, limit: Option<usize>) -> RegistryResult<Tags> {
        let root = self.layout().tags(&self.name);
        let keys = list_or_empty(self.bucket(), &root).await?;
        let tags = keys
            .iter()
            .filter_map(|key| self.layout().tag_from_key(&self.name, key));
        Ok(Tags::page(self.name.clone(), tags, from, limit))
    }
}
