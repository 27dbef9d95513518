//! Cache-aside composition of an origin and a cache.
//!
//! Reads ask the cache first and fall back to the origin:
//!
//! | cache   | origin  | result                |
//! |---------|---------|-----------------------|
//! | present | any     | the cached value      |
//! | absent  | present | the origin value      |
//! | absent  | absent  | absent                |
//! | absent  | failed  | absent (logged)       |
//! | failed  | present | the origin value      |
//! | failed  | absent  | absent                |
//! | failed  | failed  | the origin's error    |
//!
//! Values found at the origin are written to the cache by a detached task.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tracing::Instrument as _;

use crate::blob::{Blob, BlobReader};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::Manifest;
use crate::name::{ManifestRef, RepoName, Tag};
use crate::page::{Catalog, Tags};
use crate::store::{Blobs, Manifests, Registry, Repo};

/// How the blob cache treats writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// The origin is the only writer; `put` and `mount` are unsupported.
    #[default]
    ReadThrough,

    /// Writes go to the origin, then to the cache.
    WriteThrough,
}

/// The answer from the cache.
#[derive(Debug)]
pub enum CacheLookup<T> {
    /// The cache has the value.
    Hit(T),
    /// The cache does not have the value.
    Miss,
    /// The cache could not be asked.
    Failed(RegistryError),
}

/// Where a cache-aside read was answered from.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolved<T> {
    /// Answered by the cache.
    Cache(T),
    /// Answered by the origin.
    Origin(T),
    /// Neither had it.
    Absent,
}

impl<T> From<RegistryResult<Option<T>>> for CacheLookup<T> {
    fn from(value: RegistryResult<Option<T>>) -> Self {
        match value {
            Ok(Some(value)) => CacheLookup::Hit(value),
            Ok(None) => CacheLookup::Miss,
            Err(err) => CacheLookup::Failed(err),
        }
    }
}

impl<T> CacheLookup<T> {
    /// Ask the cache.
    pub async fn of<F>(cache: F) -> Self
    where
        F: Future<Output = RegistryResult<Option<T>>>,
    {
        cache.await.into()
    }

    /// Settle the lookup, asking the origin unless the cache had the value.
    pub async fn or_origin<F, Fut>(self, origin: F) -> RegistryResult<Resolved<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RegistryResult<Option<T>>>,
    {
        let from_origin = |found: Option<T>| found.map_or(Resolved::Absent, Resolved::Origin);

        match self {
            CacheLookup::Hit(value) => Ok(Resolved::Cache(value)),
            CacheLookup::Miss => match origin().await {
                Ok(found) => Ok(from_origin(found)),
                Err(err) => {
                    tracing::warn!("Origin failed after a cache miss: {err}");
                    Ok(Resolved::Absent)
                }
            },
            CacheLookup::Failed(err) => {
                tracing::warn!("Cache failed, asking origin: {err}");
                origin().await.map(from_origin)
            }
        }
    }
}

impl<T> Resolved<T> {
    /// The value, wherever it came from.
    pub fn into_option(self) -> Option<T> {
        match self {
            Resolved::Cache(value) | Resolved::Origin(value) => Some(value),
            Resolved::Absent => None,
        }
    }
}

/// Run a cache write without waiting for it. Failures are logged.
fn detach<F>(what: &'static str, task: F)
where
    F: Future<Output = RegistryResult<()>> + Send + 'static,
{
    tokio::spawn(
        async move {
            if let Err(err) = task.await {
                tracing::warn!("Failed to {what}: {err}");
            }
        }
        .in_current_span(),
    );
}

/// Union of the origin's page with the cache's page, re-paginated.
///
/// The origin's failure propagates. The cache's failure is logged and ignored.
async fn union<T, O, C>(
    origin: O,
    cache: C,
    from: Option<&T>,
    limit: Option<usize>,
) -> RegistryResult<Vec<T>>
where
    T: Ord,
    O: Future<Output = RegistryResult<Vec<T>>>,
    C: Future<Output = RegistryResult<Vec<T>>>,
{
    let mut items = origin.await?;
    match cache.await {
        Ok(cached) => items.extend(cached),
        Err(err) => tracing::warn!("Cache listing failed, using origin only: {err}"),
    }
    Ok(crate::page::paginate(items, from, limit))
}

/// Blobs read from a cache, falling back to an origin.
#[derive(Debug, Clone)]
pub struct CacheBlobs {
    origin: Arc<dyn Blobs>,
    cache: Arc<dyn Blobs>,
    mode: CacheMode,
}

impl CacheBlobs {
    /// Compose `cache` in front of `origin`.
    pub fn new(origin: Arc<dyn Blobs>, cache: Arc<dyn Blobs>, mode: CacheMode) -> Self {
        Self {
            origin,
            cache,
            mode,
        }
    }

    async fn fill(&self, blob: &Blob) {
        if let Err(err) = self.cache.mount(blob).await {
            tracing::warn!(digest = %blob.digest(), "Failed to write blob to cache: {err}");
        }
    }
}

#[async_trait::async_trait]
impl Blobs for CacheBlobs {
    #[tracing::instrument(skip(self, content), fields(%digest, mode = ?self.mode))]
    async fn put(&self, content: BlobReader, digest: &Digest) -> RegistryResult<Blob> {
        match self.mode {
            CacheMode::ReadThrough => Err(RegistryError::Unsupported("put on a read-through cache")),
            CacheMode::WriteThrough => {
                let blob = self.origin.put(content, digest).await?;
                self.fill(&blob).await;
                Ok(blob)
            }
        }
    }

    #[tracing::instrument(skip(self, blob), fields(digest = %blob.digest(), mode = ?self.mode))]
    async fn mount(&self, blob: &Blob) -> RegistryResult<Blob> {
        match self.mode {
            CacheMode::ReadThrough => {
                Err(RegistryError::Unsupported("mount on a read-through cache"))
            }
            CacheMode::WriteThrough => {
                let mounted = self.origin.mount(blob).await?;
                self.fill(&mounted).await;
                Ok(mounted)
            }
        }
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        let resolved = CacheLookup::of(self.cache.get(digest))
            .await
            .or_origin(|| self.origin.get(digest))
            .await?;

        if let Resolved::Origin(blob) = &resolved {
            tracing::debug!("Blob served by origin");
            let cache = self.cache.clone();
            let blob = blob.clone();
            detach("populate blob cache", async move {
                cache.mount(&blob).await.map(drop)
            });
        }

        Ok(resolved.into_option())
    }
}

/// Manifests read from a cache, falling back to an origin.
#[derive(Debug, Clone)]
pub struct CacheManifests {
    origin: Arc<dyn Manifests>,
    cache: Arc<dyn Manifests>,
}

impl CacheManifests {
    /// Compose `cache` in front of `origin`.
    pub fn new(origin: Arc<dyn Manifests>, cache: Arc<dyn Manifests>) -> Self {
        Self { origin, cache }
    }

    fn fill(&self, reference: &ManifestRef, body: Bytes) {
        let cache = self.cache.clone();
        let reference = reference.clone();
        detach("populate manifest cache", async move {
            cache.put(&reference, body).await.map(drop)
        });
    }
}

#[async_trait::async_trait]
impl Manifests for CacheManifests {
    #[tracing::instrument(skip(self, content), fields(%reference))]
    async fn put(&self, reference: &ManifestRef, content: Bytes) -> RegistryResult<Manifest> {
        let manifest = self.origin.put(reference, content).await?;
        self.fill(reference, manifest.body().clone());
        Ok(manifest)
    }

    #[tracing::instrument(skip(self), fields(%reference))]
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>> {
        let resolved = CacheLookup::of(self.cache.get(reference))
            .await
            .or_origin(|| self.origin.get(reference))
            .await?;

        if let Resolved::Origin(manifest) = &resolved {
            tracing::debug!(digest = %manifest.digest(), "Manifest served by origin");
            self.fill(reference, manifest.body().clone());
        }

        Ok(resolved.into_option())
    }

    #[tracing::instrument(skip(self))]
    async fn tags(&self, from: Option<&Tag>, limit: Option<usize>) -> RegistryResult<Tags> {
        let mut name = None;
        let tags = union(
            async {
                let tags = self.origin.tags(from, limit).await?;
                name = Some(tags.name);
                Ok::<_, RegistryError>(tags.tags)
            },
            async { Ok::<_, RegistryError>(self.cache.tags(from, limit).await?.tags) },
            from,
            limit,
        )
        .await?;

        let name = name.ok_or_else(|| {
            RegistryError::InvalidRemoteResponse("origin listed no repository name".into())
        })?;
        Ok(Tags { name, tags })
    }
}

/// A registry whose repositories are cache-aside compositions.
#[derive(Debug, Clone)]
pub struct CacheRegistry {
    origin: Arc<dyn Registry>,
    cache: Arc<dyn Registry>,
    mode: CacheMode,
}

impl CacheRegistry {
    /// Compose `cache` in front of `origin`.
    pub fn new(origin: Arc<dyn Registry>, cache: Arc<dyn Registry>, mode: CacheMode) -> Self {
        Self {
            origin,
            cache,
            mode,
        }
    }
}

#[async_trait::async_trait]
impl Registry for CacheRegistry {
    fn repo(&self, name: &RepoName) -> Repo {
        let origin = self.origin.repo(name);
        let cache = self.cache.repo(name);
        Repo {
            name: name.clone(),
            blobs: Arc::new(CacheBlobs::new(origin.blobs, cache.blobs, self.mode)),
            manifests: Arc::new(CacheManifests::new(origin.manifests, cache.manifests)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn catalog(
        &self,
        from: Option<&RepoName>,
        limit: Option<usize>,
    ) -> RegistryResult<Catalog> {
        let repositories = union(
            async { Ok::<_, RegistryError>(self.origin.catalog(from, limit).await?.repositories) },
            async { Ok::<_, RegistryError>(self.cache.catalog(from, limit).await?.repositories) },
            from,
            limit,
        )
        .await?;
        Ok(Catalog { repositories })
    }
}
