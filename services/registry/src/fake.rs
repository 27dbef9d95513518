//! Stores with fixed behavior, for exercising compositions.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt as _;

use crate::blob::{Blob, BlobReader};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::Manifest;
use crate::name::{ManifestRef, RepoName, Tag};
use crate::page::Tags;
use crate::store::{Blobs, Manifests};

#[derive(Debug, Clone)]
enum State<T> {
    Empty,
    Full(T),
    Faulty,
}

fn faulty() -> RegistryError {
    RegistryError::RemoteUnavailable("faulty source".into())
}

#[derive(Debug)]
pub(crate) struct FakeBlobs {
    state: State<Blob>,
    gets: AtomicUsize,
    stored: Mutex<Vec<Digest>>,
}

impl FakeBlobs {
    fn new(state: State<Blob>) -> Self {
        Self {
            state,
            gets: AtomicUsize::new(0),
            stored: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(State::Empty)
    }

    pub(crate) fn full(blob: Blob) -> Self {
        Self::new(State::Full(blob))
    }

    pub(crate) fn faulty() -> Self {
        Self::new(State::Faulty)
    }

    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn stored(&self) -> Vec<Digest> {
        self.stored.lock().clone()
    }
}

#[async_trait::async_trait]
impl Blobs for FakeBlobs {
    async fn put(&self, content: BlobReader, digest: &Digest) -> RegistryResult<Blob> {
        if let State::Faulty = self.state {
            return Err(faulty());
        }
        let mut content = content;
        let mut data = Vec::new();
        content.read_to_end(&mut data).await?;
        let blob = Blob::from_bytes(data);
        if blob.digest() != digest {
            return Err(RegistryError::DigestMismatch {
                expected: digest.clone(),
                computed: blob.digest().clone(),
            });
        }
        self.stored.lock().push(digest.clone());
        Ok(blob)
    }

    async fn mount(&self, blob: &Blob) -> RegistryResult<Blob> {
        if let State::Faulty = self.state {
            return Err(faulty());
        }
        self.stored.lock().push(blob.digest().clone());
        Ok(blob.clone())
    }

    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        match &self.state {
            State::Empty => Ok(None),
            State::Full(blob) if blob.digest() == digest => Ok(Some(blob.clone())),
            State::Full(_) => Ok(None),
            State::Faulty => Err(faulty()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct FakeManifests {
    name: RepoName,
    state: State<(Manifest, Vec<Tag>)>,
    gets: AtomicUsize,
    stored: Mutex<Vec<ManifestRef>>,
}

impl FakeManifests {
    fn new(state: State<(Manifest, Vec<Tag>)>) -> Self {
        Self {
            name: "fake".parse().expect("valid name"),
            state,
            gets: AtomicUsize::new(0),
            stored: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::new(State::Empty)
    }

    /// Answers any reference with `manifest`, and lists `tags`.
    pub(crate) fn full(manifest: Manifest, tags: &[&str]) -> Self {
        let tags = tags
            .iter()
            .map(|tag| tag.parse().expect("valid tag"))
            .collect();
        Self::new(State::Full((manifest, tags)))
    }

    pub(crate) fn faulty() -> Self {
        Self::new(State::Faulty)
    }

    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn stored(&self) -> Vec<ManifestRef> {
        self.stored.lock().clone()
    }
}

#[async_trait::async_trait]
impl Manifests for FakeManifests {
    async fn put(&self, reference: &ManifestRef, content: Bytes) -> RegistryResult<Manifest> {
        if let State::Faulty = self.state {
            return Err(faulty());
        }
        self.stored.lock().push(reference.clone());
        Manifest::parse(content)
    }

    async fn get(&self, _reference: &ManifestRef) -> RegistryResult<Option<Manifest>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        match &self.state {
            State::Empty => Ok(None),
            State::Full((manifest, _)) => Ok(Some(manifest.clone())),
            State::Faulty => Err(faulty()),
        }
    }

    async fn tags(&self, from: Option<&Tag>, limit: Option<usize>) -> RegistryResult<Tags> {
        match &self.state {
            State::Empty => Ok(Tags::page(self.name.clone(), Vec::new(), from, limit)),
            State::Full((_, tags)) => Ok(Tags::page(self.name.clone(), tags.clone(), from, limit)),
            State::Faulty => Err(faulty()),
        }
    }
}
