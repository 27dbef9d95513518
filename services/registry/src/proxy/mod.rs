//! A read-only view of a remote registry, over its HTTP API.

use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{Method, StatusCode};

use crate::blob::{Blob, BlobReader};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{MANIFEST_MEDIA_TYPES, Manifest};
use crate::name::{ManifestRef, RepoName, Tag};
use crate::page::{Catalog, Tags};
use crate::store::{Blobs, Manifests, Registry, Repo};

mod client;
pub mod mock;
mod timeout;
mod uri;

pub use self::client::RemoteClient;

/// Header carrying the digest of a served manifest.
pub const CONTENT_DIGEST: &str = "docker-content-digest";

/// A remote registry.
#[derive(Debug, Clone)]
pub struct ProxyRegistry {
    client: RemoteClient,
}

impl ProxyRegistry {
    /// Read from the registry behind `client`.
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    /// Blobs of repository `name`.
    pub fn blobs(&self, name: &RepoName) -> ProxyBlobs {
        ProxyBlobs {
            client: self.client.clone(),
            name: name.clone(),
        }
    }

    /// Manifests of repository `name`.
    pub fn manifests(&self, name: &RepoName) -> ProxyManifests {
        ProxyManifests {
            client: self.client.clone(),
            name: name.clone(),
        }
    }
}

#[async_trait::async_trait]
impl Registry for ProxyRegistry {
    fn repo(&self, name: &RepoName) -> Repo {
        Repo {
            name: name.clone(),
            blobs: Arc::new(self.blobs(name)),
            manifests: Arc::new(self.manifests(name)),
        }
    }

    #[tracing::instrument(skip(self), fields(remote = %self.client.base()))]
    async fn catalog(
        &self,
        from: Option<&RepoName>,
        limit: Option<usize>,
    ) -> RegistryResult<Catalog> {
        let path = uri::catalog(from.map(RepoName::as_str), limit)?;
        let response = self.client.send(Method::GET, &path, None).await?;
        match response.status() {
            StatusCode::OK => client::json(response).await,
            status => Err(RegistryError::UnexpectedRemoteStatus { status }),
        }
    }
}

/// Blobs of one repository of a remote registry.
#[derive(Debug, Clone)]
pub struct ProxyBlobs {
    client: RemoteClient,
    name: RepoName,
}

#[async_trait::async_trait]
impl Blobs for ProxyBlobs {
    async fn put(&self, _content: BlobReader, _digest: &Digest) -> RegistryResult<Blob> {
        Err(RegistryError::Unsupported("put on a remote registry"))
    }

    async fn mount(&self, _blob: &Blob) -> RegistryResult<Blob> {
        Err(RegistryError::Unsupported("mount on a remote registry"))
    }

    #[tracing::instrument(skip(self), fields(remote = %self.client.base(), repo = %self.name, %digest))]
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        let path = uri::blob(&self.name, digest);
        let response = self.client.send(Method::HEAD, &path, None).await?;

        match response.status() {
            StatusCode::OK => {
                let size = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .ok_or_else(|| {
                        RegistryError::InvalidRemoteResponse(
                            "blob without a valid content length".into(),
                        )
                    })?;
                Ok(Some(Blob::remote(
                    digest.clone(),
                    size,
                    self.client.clone(),
                    path,
                )))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(RegistryError::UnexpectedRemoteStatus { status }),
        }
    }
}

/// Manifests of one repository of a remote registry.
#[derive(Debug, Clone)]
pub struct ProxyManifests {
    client: RemoteClient,
    name: RepoName,
}

/// Pick the digest of a served manifest.
///
/// A sha256 digest is checked against the body. Other algorithms are taken on trust.
fn served_digest(header: Option<&str>, body: &[u8]) -> RegistryResult<Digest> {
    let computed = Digest::sha256(body);
    let Some(declared) = header.and_then(|value| value.parse::<Digest>().ok()) else {
        return Ok(computed);
    };

    if declared.algorithm() == computed.algorithm() && declared != computed {
        return Err(RegistryError::InvalidRemoteResponse(format!(
            "manifest served as {declared} hashes to {computed}"
        )));
    }
    Ok(declared)
}

#[async_trait::async_trait]
impl Manifests for ProxyManifests {
    async fn put(&self, _reference: &ManifestRef, _content: Bytes) -> RegistryResult<Manifest> {
        Err(RegistryError::Unsupported("put on a remote registry"))
    }

    #[tracing::instrument(skip(self), fields(remote = %self.client.base(), repo = %self.name, %reference))]
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>> {
        let path = uri::manifest(&self.name, reference);
        let accept = MANIFEST_MEDIA_TYPES.join(", ");
        let response = self
            .client
            .send(Method::GET, &path, Some(&accept))
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Ok(None),
            status => return Err(RegistryError::UnexpectedRemoteStatus { status }),
        }

        let header = response
            .headers()
            .get(CONTENT_DIGEST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = client::bytes(response).await?;
        let digest = served_digest(header.as_deref(), &body)?;

        if let Some(expected) = reference.digest() {
            if *expected != digest {
                return Err(RegistryError::InvalidRemoteResponse(format!(
                    "asked for {expected}, served {digest}"
                )));
            }
        }

        Manifest::with_digest(digest, body)
            .map(Some)
            .map_err(|err| RegistryError::InvalidRemoteResponse(err.to_string()))
    }

    #[tracing::instrument(skip(self), fields(remote = %self.client.base(), repo = %self.name))]
    async fn tags(&self, from: Option<&Tag>, limit: Option<usize>) -> RegistryResult<Tags> {
        let path = uri::tags(&self.name, from.map(Tag::as_str), limit)?;
        let response = self.client.send(Method::GET, &path, None).await?;
        match response.status() {
            StatusCode::OK => client::json(response).await,
            StatusCode::NOT_FOUND => Ok(Tags {
                name: self.name.clone(),
                tags: Vec::new(),
            }),
            status => Err(RegistryError::UnexpectedRemoteStatus { status }),
        }
    }
}
