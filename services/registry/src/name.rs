//! Validated repository names, tags and manifest references.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::digest::Digest;
use crate::error::RegistryError;

const MAX_REPO_NAME: usize = 255;
const MAX_TAG: usize = 128;

/// A repository name such as `library/alpine`.
///
/// Names are one or more `/`-separated path components, each matching
/// `[a-z0-9]+([._-][a-z0-9]+)*`, at most 255 characters in total.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoName(String);

impl RepoName {
    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let separator = |b: &u8| matches!(b, b'.' | b'_' | b'-');

    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) if alnum(first) && alnum(last) => {
            bytes.iter().all(|b| alnum(b) || separator(b))
                && !bytes.windows(2).any(|w| separator(&w[0]) && separator(&w[1]))
        }
        _ => false,
    }
}

impl FromStr for RepoName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > MAX_REPO_NAME || !s.split('/').all(valid_component) {
            return Err(RegistryError::InvalidRepoName(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for RepoName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoName> for String {
    fn from(value: RepoName) -> Self {
        value.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag, `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

impl Tag {
    /// The tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tag {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let valid = match bytes.split_first() {
            Some((first, rest)) => {
                bytes.len() <= MAX_TAG
                    && (first.is_ascii_alphanumeric() || *first == b'_')
                    && rest
                        .iter()
                        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
            }
            None => false,
        };

        if !valid {
            return Err(RegistryError::InvalidTagName(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

impl TryFrom<String> for Tag {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tag> for String {
    fn from(value: Tag) -> Self {
        value.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a manifest is addressed: by a mutable tag, or by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ManifestRef {
    /// A tag, resolved through its link.
    Tag(Tag),
    /// A digest, addressing the manifest content directly.
    Digest(Digest),
}

impl ManifestRef {
    /// The reference as it appears in a URL path.
    pub fn as_str(&self) -> &str {
        match self {
            ManifestRef::Tag(tag) => tag.as_str(),
            ManifestRef::Digest(digest) => digest.as_str(),
        }
    }

    /// The digest, when addressed by digest.
    pub fn digest(&self) -> Option<&Digest> {
        match self {
            ManifestRef::Digest(digest) => Some(digest),
            ManifestRef::Tag(_) => None,
        }
    }
}

impl From<Tag> for ManifestRef {
    fn from(value: Tag) -> Self {
        ManifestRef::Tag(value)
    }
}

impl From<Digest> for ManifestRef {
    fn from(value: Digest) -> Self {
        ManifestRef::Digest(value)
    }
}

impl FromStr for ManifestRef {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Tags can't contain ':'.
        if s.contains(':') {
            s.parse().map(ManifestRef::Digest)
        } else {
            s.parse().map(ManifestRef::Tag)
        }
    }
}

impl TryFrom<String> for ManifestRef {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ManifestRef> for String {
    fn from(value: ManifestRef) -> Self {
        match value {
            ManifestRef::Tag(tag) => tag.into(),
            ManifestRef::Digest(digest) => digest.into(),
        }
    }
}

impl PartialOrd for ManifestRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ManifestRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
