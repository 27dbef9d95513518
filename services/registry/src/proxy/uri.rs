//! Paths of the registry HTTP API.

use serde::Serialize;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::name::{ManifestRef, RepoName};

#[derive(Debug, Serialize)]
struct Page<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last: Option<&'a str>,
}

fn query<T: Serialize>(params: T) -> RegistryResult<String> {
    serde_urlencoded::to_string(params)
        .map_err(|err| RegistryError::InvalidConfig(format!("query string: {err}")))
}

fn with_page(path: String, last: Option<&str>, n: Option<usize>) -> RegistryResult<String> {
    let query = query(Page { n, last })?;
    if query.is_empty() {
        Ok(path)
    } else {
        Ok(format!("{path}?{query}"))
    }
}

pub(crate) fn blob(repo: &RepoName, digest: &Digest) -> String {
    format!("/v2/{repo}/blobs/{digest}")
}

pub(crate) fn manifest(repo: &RepoName, reference: &ManifestRef) -> String {
    format!("/v2/{repo}/manifests/{reference}")
}

pub(crate) fn tags(repo: &RepoName, last: Option<&str>, n: Option<usize>) -> RegistryResult<String> {
    with_page(format!("/v2/{repo}/tags/list"), last, n)
}

pub(crate) fn catalog(last: Option<&str>, n: Option<usize>) -> RegistryResult<String> {
    with_page("/v2/_catalog".to_owned(), last, n)
}
