//! Reads from an ordered list of sources.
//!
//! Sources are asked one at a time, in order. The first one which has the
//! content answers; failures are logged and the next source is asked. When no
//! source has the content the answer is absent, even if some sources failed.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::blob::{Blob, BlobReader};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::Manifest;
use crate::name::{ManifestRef, RepoName, Tag};
use crate::page::{Catalog, Tags, paginate};
use crate::store::{Blobs, Manifests, Registry, Repo};

async fn first<'a, S, T, F>(sources: &'a [Arc<S>], mut ask: F) -> Option<T>
where
    S: ?Sized + 'a,
    F: FnMut(&'a S) -> BoxFuture<'a, RegistryResult<Option<T>>>,
{
    for (index, source) in sources.iter().enumerate() {
        match ask(&**source).await {
            Ok(Some(found)) => {
                tracing::debug!(source = index, "Found");
                return Some(found);
            }
            Ok(None) => tracing::trace!(source = index, "Absent"),
            Err(err) => tracing::warn!(source = index, "Source failed: {err}"),
        }
    }
    None
}

async fn every<'a, S, T, F>(sources: &'a [Arc<S>], mut ask: F) -> Vec<T>
where
    S: ?Sized + 'a,
    F: FnMut(&'a S) -> BoxFuture<'a, RegistryResult<Vec<T>>>,
{
    let mut items = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        match ask(&**source).await {
            Ok(found) => items.extend(found),
            Err(err) => tracing::warn!(source = index, "Source failed to list: {err}"),
        }
    }
    items
}

/// Blobs from the first of several sources which has them. Read only.
#[derive(Debug, Clone)]
pub struct MultiReadBlobs {
    sources: Vec<Arc<dyn Blobs>>,
}

impl MultiReadBlobs {
    /// Sources in the order they should be asked.
    pub fn new(sources: Vec<Arc<dyn Blobs>>) -> Self {
        Self { sources }
    }
}

#[async_trait::async_trait]
impl Blobs for MultiReadBlobs {
    async fn put(&self, _content: BlobReader, _digest: &Digest) -> RegistryResult<Blob> {
        Err(RegistryError::Unsupported("put on a multi-source reader"))
    }

    async fn mount(&self, _blob: &Blob) -> RegistryResult<Blob> {
        Err(RegistryError::Unsupported("mount on a multi-source reader"))
    }

    #[tracing::instrument(skip(self), fields(%digest, sources = self.sources.len()))]
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        Ok(first(&self.sources, |source| source.get(digest)).await)
    }
}

/// Manifests from the first of several sources which has them. Read only.
#[derive(Debug, Clone)]
pub struct MultiReadManifests {
    name: RepoName,
    sources: Vec<Arc<dyn Manifests>>,
}

impl MultiReadManifests {
    /// Sources for repository `name`, in the order they should be asked.
    pub fn new(name: RepoName, sources: Vec<Arc<dyn Manifests>>) -> Self {
        Self { name, sources }
    }
}

#[async_trait::async_trait]
impl Manifests for MultiReadManifests {
    async fn put(&self, _reference: &ManifestRef, _content: Bytes) -> RegistryResult<Manifest> {
        Err(RegistryError::Unsupported("put on a multi-source reader"))
    }

    #[tracing::instrument(skip(self), fields(repo = %self.name, %reference))]
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>> {
        Ok(first(&self.sources, |source| source.get(reference)).await)
    }

    #[tracing::instrument(skip(self), fields(repo = %self.name))]
    async fn tags(&self, from: Option<&Tag>, limit: Option<usize>) -> RegistryResult<Tags> {
        let tags = every(&self.sources, |source| {
            Box::pin(async move { Ok::<_, RegistryError>(source.tags(from, limit).await?.tags) })
        })
        .await;
        Ok(Tags {
            name: self.name.clone(),
            tags: paginate(tags, from, limit),
        })
    }
}

/// A registry reading from several registries in order. Read only.
#[derive(Debug, Clone)]
pub struct MultiReadRegistry {
    sources: Vec<Arc<dyn Registry>>,
}

impl MultiReadRegistry {
    /// Sources in the order they should be asked.
    pub fn new(sources: Vec<Arc<dyn Registry>>) -> Self {
        Self { sources }
    }
}

#[async_trait::async_trait]
impl Registry for MultiReadRegistry {
    fn repo(&self, name: &RepoName) -> Repo {
        let (blobs, manifests): (Vec<_>, Vec<_>) = self
            .sources
            .iter()
            .map(|source| {
                let repo = source.repo(name);
                (repo.blobs, repo.manifests)
            })
            .unzip();

        Repo {
            name: name.clone(),
            blobs: Arc::new(MultiReadBlobs::new(blobs)),
            manifests: Arc::new(MultiReadManifests::new(name.clone(), manifests)),
        }
    }

    #[tracing::instrument(skip(self), fields(sources = self.sources.len()))]
    async fn catalog(
        &self,
        from: Option<&RepoName>,
        limit: Option<usize>,
    ) -> RegistryResult<Catalog> {
        let repositories = every(&self.sources, |source| {
            Box::pin(async move {
                Ok::<_, RegistryError>(source.catalog(from, limit).await?.repositories)
            })
        })
        .await;
        Ok(Catalog::page(repositories, from, limit))
    }
}
