//! Manifest documents.

use bytes::Bytes;
use serde::Deserialize;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

/// Docker image manifest, schema 1.
pub const DOCKER_MANIFEST_V1: &str = "application/vnd.docker.distribution.manifest.v1+json";
/// Signed docker image manifest, schema 1.
pub const DOCKER_MANIFEST_V1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Every manifest media type understood by the registry, most preferred first.
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_MANIFEST,
    OCI_INDEX,
    DOCKER_MANIFEST_V2,
    DOCKER_MANIFEST_LIST,
    DOCKER_MANIFEST_V1_SIGNED,
    DOCKER_MANIFEST_V1,
];

/// A reference from a manifest to other content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    #[serde(default)]
    pub media_type: Option<String>,

    /// Digest of the referenced content.
    pub digest: Digest,

    /// Size of the referenced content in bytes.
    pub size: u64,

    /// Alternate locations of the content.
    #[serde(default)]
    pub urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    schema_version: Option<u64>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<serde_json::Value>,
    #[serde(default)]
    config: Option<serde_json::Value>,
    #[serde(default)]
    layers: Option<serde_json::Value>,
}

/// A manifest, as stored: its digest, media type and the exact bytes pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    digest: Digest,
    media_type: String,
    body: Bytes,
}

impl Manifest {
    /// Validate `body` and compute its digest.
    pub fn parse(body: Bytes) -> RegistryResult<Self> {
        let digest = Digest::sha256(&body);
        Self::with_digest(digest, body)
    }

    /// Validate `body`, which is already known to hash to `digest`.
    pub(crate) fn with_digest(digest: Digest, body: Bytes) -> RegistryResult<Self> {
        let document = document(&body)?;
        let media_type = detect_media_type(&document);
        Ok(Self {
            digest,
            media_type,
            body,
        })
    }

    /// Manifest digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Media type, as declared or inferred from the schema.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Raw manifest bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Size of the manifest in bytes.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    /// The image configuration descriptor, for image manifests.
    pub fn config(&self) -> RegistryResult<Option<Descriptor>> {
        document(&self.body)?
            .config
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| RegistryError::InvalidManifest(format!("config: {err}")))
    }

    /// Layer descriptors, in order. Manifest lists and indexes have none.
    pub fn layers(&self) -> RegistryResult<Vec<Descriptor>> {
        document(&self.body)?
            .layers
            .map(serde_json::from_value)
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(|err| RegistryError::InvalidManifest(format!("layers: {err}")))
    }
}

fn document(body: &[u8]) -> RegistryResult<Document> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|err| RegistryError::InvalidManifest(err.to_string()))?;
    if !value.is_object() {
        return Err(RegistryError::InvalidManifest(
            "manifest must be a JSON object".into(),
        ));
    }
    serde_json::from_value(value).map_err(|err| RegistryError::InvalidManifest(err.to_string()))
}

fn detect_media_type(document: &Document) -> String {
    if let Some(media_type) = &document.media_type {
        return media_type.clone();
    }

    match document.schema_version {
        Some(1) => DOCKER_MANIFEST_V1.to_string(),
        Some(2) if document.manifests.is_some() => DOCKER_MANIFEST_LIST.to_string(),
        Some(2) => DOCKER_MANIFEST_V2.to_string(),
        _ => OCI_MANIFEST.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_media_types() {
        let oci = Manifest::parse(Bytes::from_static(
            br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.manifest.v1+json"}"#,
        ))
        .unwrap();
        assert_eq!(oci.media_type(), OCI_MANIFEST);

        let list = Manifest::parse(Bytes::from_static(br#"{"schemaVersion":2,"manifests":[]}"#))
            .unwrap();
        assert_eq!(list.media_type(), DOCKER_MANIFEST_LIST);

        let v1 = Manifest::parse(Bytes::from_static(br#"{"schemaVersion":1}"#)).unwrap();
        assert_eq!(v1.media_type(), DOCKER_MANIFEST_V1);

        let bare = Manifest::parse(Bytes::from_static(b"{}")).unwrap();
        assert_eq!(bare.media_type(), OCI_MANIFEST);
        assert_eq!(bare.digest(), &Digest::sha256(b"{}"));
    }

    #[test]
    fn rejects_non_objects() {
        for body in [&b"not json"[..], b"[]", b"\"string\"", b""] {
            assert!(matches!(
                Manifest::parse(Bytes::copy_from_slice(body)),
                Err(RegistryError::InvalidManifest(_))
            ));
        }
    }

    #[test]
    fn reads_layers() {
        let layer = Digest::sha256(b"layer");
        let body = format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "{DOCKER_MANIFEST_V2}",
                "config": {{"mediaType": "application/vnd.docker.container.image.v1+json", "size": 7, "digest": "{config}"}},
                "layers": [
                    {{"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 5, "digest": "{layer}"}},
                    {{"size": 9, "digest": "{layer}", "urls": ["https://example.com/layer"]}}
                ]
            }}"#,
            config = Digest::sha256(b"config"),
        );
        let manifest = Manifest::parse(Bytes::from(body)).unwrap();

        let layers = manifest.layers().unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].digest, layer);
        assert_eq!(layers[0].size, 5);
        assert_eq!(layers[1].media_type, None);
        assert_eq!(layers[1].urls, vec!["https://example.com/layer".to_string()]);

        let config = manifest.config().unwrap().unwrap();
        assert_eq!(config.size, 7);
    }

    #[test]
    fn index_has_no_layers() {
        let manifest =
            Manifest::parse(Bytes::from_static(br#"{"schemaVersion":2,"manifests":[]}"#)).unwrap();
        assert!(manifest.layers().unwrap().is_empty());
        assert!(manifest.config().unwrap().is_none());
    }
}
