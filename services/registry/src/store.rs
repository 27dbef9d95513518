//! Store contracts shared by every backend.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::blob::{Blob, BlobReader};
use crate::digest::Digest;
use crate::error::RegistryResult;
use crate::manifest::Manifest;
use crate::name::{ManifestRef, RepoName, Tag};
use crate::page::{Catalog, Tags};

/// Blob storage for one repository.
#[async_trait::async_trait]
pub trait Blobs: fmt::Debug + Send + Sync {
    /// Store `content`, which must hash to `digest`.
    ///
    /// Fails with [`DigestMismatch`](crate::RegistryError::DigestMismatch) otherwise,
    /// leaving nothing stored under `digest`.
    async fn put(&self, content: BlobReader, digest: &Digest) -> RegistryResult<Blob>;

    /// Make a blob which exists elsewhere available in this repository.
    async fn mount(&self, blob: &Blob) -> RegistryResult<Blob>;

    /// Find a blob. A missing blob is `Ok(None)`.
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>>;
}

/// Manifest storage for one repository.
#[async_trait::async_trait]
pub trait Manifests: fmt::Debug + Send + Sync {
    /// Store a manifest, and point `reference` at it when it is a tag.
    async fn put(&self, reference: &ManifestRef, content: Bytes) -> RegistryResult<Manifest>;

    /// Find a manifest. A missing tag or manifest is `Ok(None)`.
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>>;

    /// A page of this repository's tags, strictly after `from`.
    async fn tags(&self, from: Option<&Tag>, limit: Option<usize>) -> RegistryResult<Tags>;
}

/// One repository: its name and its stores.
#[derive(Debug, Clone)]
pub struct Repo {
    /// Repository name.
    pub name: RepoName,

    /// Blob store.
    pub blobs: Arc<dyn Blobs>,

    /// Manifest store.
    pub manifests: Arc<dyn Manifests>,
}

/// A registry: repositories and a catalog of them.
#[async_trait::async_trait]
pub trait Registry: fmt::Debug + Send + Sync {
    /// The repository called `name`. Repositories need not exist to be opened.
    fn repo(&self, name: &RepoName) -> Repo;

    /// A page of repository names, strictly after `from`.
    async fn catalog(&self, from: Option<&RepoName>, limit: Option<usize>)
    -> RegistryResult<Catalog>;
}
