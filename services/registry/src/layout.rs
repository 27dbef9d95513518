//! Storage key layout.
//!
//! A [`Layout`] maps registry entities onto keys in the underlying storage.
//! The default layout matches the on-disk format of the reference
//! distribution registry:
//!
//! ```text
//! <root>/blobs/<algorithm>/<hex[0:2]>/<hex>/data
//! <root>/manifests/<repo>/tags/<tag>/current/link
//! <root>/manifests/<repo>/revisions/<algorithm>/<hex>/link
//! <root>/repositories
//! ```

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use uuid::Uuid;

use crate::digest::Digest;
use crate::name::{ManifestRef, RepoName, Tag};

/// Root of the default layout.
pub const DEFAULT_ROOT: &str = "docker/registry/v2";

const MARKER: &str = "_index";

/// A storage key, produced by a [`Layout`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Utf8PathBuf);

impl Key {
    fn new(path: Utf8PathBuf) -> Self {
        Self(path)
    }

    /// The key as a relative path.
    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    fn relative<'a>(&self, listed: &'a str) -> Option<&'a Utf8Path> {
        Utf8Path::new(listed).strip_prefix(&self.0).ok()
    }
}

impl AsRef<Utf8Path> for Key {
    fn as_ref(&self) -> &Utf8Path {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Placement of registry entities in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// The distribution registry layout, rooted at `root`.
    Default {
        /// Prefix for every key, usually [`DEFAULT_ROOT`].
        root: Utf8PathBuf,
    },

    /// The flat layout used by early deployments:
    /// `blobs/<alg>/<hex>`, `manifests/<repo>/<alg>:<hex>`, `tags/<repo>/<tag>`.
    Legacy {
        /// Prefix for every key, usually empty.
        root: Utf8PathBuf,
    },
}

impl Default for Layout {
    fn default() -> Self {
        Layout::Default {
            root: DEFAULT_ROOT.into(),
        }
    }
}

impl Layout {
    /// The legacy layout at the top of the bucket.
    pub fn legacy() -> Self {
        Layout::Legacy {
            root: Utf8PathBuf::new(),
        }
    }

    fn root(&self) -> &Utf8Path {
        match self {
            Layout::Default { root } | Layout::Legacy { root } => root,
        }
    }

    /// Blob content. Blobs are shared by every repository in the store.
    pub fn blob(&self, digest: &Digest) -> Key {
        let mut path = self.root().join("blobs");
        path.push(digest.algorithm());
        match self {
            Layout::Default { .. } => {
                let prefix = digest.hex().get(..2).unwrap_or(digest.hex());
                path.push(prefix);
                path.push(digest.hex());
                path.push("data");
            }
            Layout::Legacy { .. } => path.push(digest.hex()),
        }
        Key::new(path)
    }

    /// Link holding the digest of the manifest for `reference`.
    pub fn manifest(&self, repo: &RepoName, reference: &ManifestRef) -> Key {
        let root = self.root();
        let path = match (self, reference) {
            (Layout::Default { .. }, ManifestRef::Tag(tag)) => {
                let mut path = self.tags(repo).0;
                path.push(tag.as_str());
                path.push("current");
                path.push("link");
                path
            }
            (Layout::Default { .. }, ManifestRef::Digest(digest)) => {
                let mut path = root.join("manifests");
                path.push(repo.as_str());
                path.push("revisions");
                path.push(digest.algorithm());
                path.push(digest.hex());
                path.push("link");
                path
            }
            (Layout::Legacy { .. }, ManifestRef::Tag(tag)) => {
                let mut path = self.tags(repo).0;
                path.push(tag.as_str());
                path
            }
            (Layout::Legacy { .. }, ManifestRef::Digest(digest)) => {
                let mut path = root.join("manifests");
                path.push(repo.as_str());
                path.push(digest.as_str());
                path
            }
        };
        Key::new(path)
    }

    /// Prefix under which every tag link of `repo` lives.
    pub fn tags(&self, repo: &RepoName) -> Key {
        let path = match self {
            Layout::Default { root } => {
                let mut path = root.join("manifests");
                path.push(repo.as_str());
                path.push("tags");
                path
            }
            Layout::Legacy { root } => {
                let mut path = root.join("tags");
                path.push(repo.as_str());
                path
            }
        };
        Key::new(path)
    }

    /// Catalog root.
    pub fn repositories(&self) -> Key {
        Key::new(self.root().join("repositories"))
    }

    /// Marker registering `repo` in the catalog.
    pub fn repository(&self, repo: &RepoName) -> Key {
        let mut path = self.repositories().0;
        path.push(repo.as_str());
        path.push(MARKER);
        Key::new(path)
    }

    /// Temporary location for an upload in progress.
    pub fn upload(&self, id: Uuid) -> Key {
        let mut path = self.root().join("uploads");
        path.push(id.to_string());
        path.push("data");
        Key::new(path)
    }

    /// Recover the tag from a key listed under [`Layout::tags`].
    ///
    /// Keys which are not tag links yield `None`.
    pub fn tag_from_key(&self, repo: &RepoName, listed: &str) -> Option<Tag> {
        let relative = self.tags(repo).relative(listed)?;
        let mut components = relative.iter();
        let tag = components.next()?;
        let rest: Vec<&str> = components.collect();

        let is_link = match self {
            Layout::Default { .. } => rest == ["current", "link"],
            Layout::Legacy { .. } => rest.is_empty(),
        };

        if is_link { tag.parse().ok() } else { None }
    }

    /// Recover the repository name from a key listed under [`Layout::repositories`].
    pub fn repository_from_key(&self, listed: &str) -> Option<RepoName> {
        let relative = self.repositories().relative(listed)?;
        if relative.file_name() != Some(MARKER) {
            return None;
        }
        relative.parent()?.as_str().parse().ok()
    }
}
