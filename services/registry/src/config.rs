//! Registry composition from configuration.
//!
//! Configuration nests: a cache or a mirror set is built from other registry
//! configurations.
//!
//! ```json
//! {
//!   "cache": {
//!     "origin": { "proxy": { "url": "https://registry-1.docker.io", "timeout-seconds": 30 } },
//!     "cache": { "local": { "storage": { "local": { "path": "/var/lib/registry" } }, "bucket": "cache" } }
//!   }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use http::Uri;
use serde::Deserialize;
use storage::StorageConfig;

use crate::cache::{CacheMode, CacheRegistry};
use crate::error::{RegistryError, RegistryResult};
use crate::layout::{DEFAULT_ROOT, Layout};
use crate::local::LocalRegistry;
use crate::multi::MultiReadRegistry;
use crate::proxy::{ProxyRegistry, RemoteClient};
use crate::store::Registry;

/// Which key layout a local registry uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutKind {
    /// See [`Layout::Default`].
    #[default]
    Default,
    /// See [`Layout::Legacy`].
    Legacy,
}

/// A registry, as read from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistryConfig {
    /// Content kept in a storage bucket.
    Local {
        /// Storage backend.
        storage: StorageConfig,
        /// Bucket holding the registry.
        bucket: String,
        /// Key layout.
        #[serde(default)]
        layout: LayoutKind,
        /// Overrides the root prefix of the layout.
        #[serde(default)]
        root: Option<Utf8PathBuf>,
    },

    /// A remote registry, read over HTTP.
    Proxy {
        /// Base URL of the remote, e.g. `https://registry-1.docker.io`.
        url: String,
        /// Per-request timeout.
        #[serde(default, rename = "timeout-seconds")]
        timeout_seconds: Option<u64>,
    },

    /// Several registries, read in order.
    Mirrors {
        /// Sources, first asked first.
        sources: Vec<RegistryConfig>,
    },

    /// An origin registry with a cache in front.
    Cache {
        /// Source of truth.
        origin: Box<RegistryConfig>,
        /// Cache, filled from the origin.
        cache: Box<RegistryConfig>,
        /// Blob write behavior.
        #[serde(default)]
        mode: CacheMode,
    },
}

impl RegistryConfig {
    /// Construct the configured registry.
    pub fn build(self) -> BoxFuture<'static, RegistryResult<Arc<dyn Registry>>> {
        Box::pin(async move {
            let registry: Arc<dyn Registry> = match self {
                RegistryConfig::Local {
                    storage,
                    bucket,
                    layout,
                    root,
                } => {
                    let layout = match layout {
                        LayoutKind::Default => Layout::Default {
                            root: root.unwrap_or_else(|| DEFAULT_ROOT.into()),
                        },
                        LayoutKind::Legacy => Layout::Legacy {
                            root: root.unwrap_or_default(),
                        },
                    };
                    tracing::debug!(%bucket, ?layout, "Local registry");
                    let storage = storage.build().await?;
                    Arc::new(LocalRegistry::new(storage.bucket(bucket), layout))
                }
                RegistryConfig::Proxy {
                    url,
                    timeout_seconds,
                } => {
                    let base = remote_base(&url)?;
                    tracing::debug!(%base, ?timeout_seconds, "Remote registry");
                    let mut client = RemoteClient::new(base);
                    if let Some(seconds) = timeout_seconds {
                        client = client.with_timeout(Duration::from_secs(seconds));
                    }
                    Arc::new(ProxyRegistry::new(client))
                }
                RegistryConfig::Mirrors { sources } => {
                    let mut built = Vec::with_capacity(sources.len());
                    for source in sources {
                        built.push(source.build().await?);
                    }
                    Arc::new(MultiReadRegistry::new(built))
                }
                RegistryConfig::Cache {
                    origin,
                    cache,
                    mode,
                } => {
                    let origin = origin.build().await?;
                    let cache = cache.build().await?;
                    Arc::new(CacheRegistry::new(origin, cache, mode))
                }
            };
            Ok(registry)
        })
    }
}

fn remote_base(url: &str) -> RegistryResult<Uri> {
    let base: Uri = url
        .parse()
        .map_err(|err| RegistryError::InvalidConfig(format!("remote url {url:?}: {err}")))?;
    match (base.scheme_str(), base.authority()) {
        (Some("http" | "https"), Some(_)) => Ok(base),
        _ => Err(RegistryError::InvalidConfig(format!(
            "remote url {url:?} must be absolute http or https"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::name::RepoName;

    fn config(json: &str) -> RegistryConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parse_nested() {
        let parsed = config(
            r#"{"cache": {
                "origin": {"mirrors": {"sources": [
                    {"proxy": {"url": "https://registry-1.docker.io", "timeout-seconds": 5}},
                    {"proxy": {"url": "https://mirror.gcr.io"}}
                ]}},
                "cache": {"local": {"storage": {"memory": {"bucket": "cache"}}, "bucket": "cache", "layout": "legacy"}},
                "mode": "write-through"
            }}"#,
        );

        let RegistryConfig::Cache {
            origin,
            cache,
            mode,
        } = parsed
        else {
            panic!("expected a cache");
        };
        assert_eq!(mode, CacheMode::WriteThrough);
        assert!(matches!(
            *cache,
            RegistryConfig::Local {
                layout: LayoutKind::Legacy,
                root: None,
                ..
            }
        ));
        let RegistryConfig::Mirrors { sources } = *origin else {
            panic!("expected mirrors");
        };
        assert!(matches!(
            &sources[0],
            RegistryConfig::Proxy {
                timeout_seconds: Some(5),
                ..
            }
        ));
        assert!(matches!(
            &sources[1],
            RegistryConfig::Proxy {
                timeout_seconds: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn build_local() {
        let registry = config(
            r#"{"local": {"storage": {"memory": {"bucket": "registry"}}, "bucket": "registry"}}"#,
        )
        .build()
        .await
        .unwrap();

        let name: RepoName = "foo".parse().unwrap();
        let manifests = registry.repo(&name).manifests;
        manifests
            .put(&"latest".parse().unwrap(), Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(
            manifests
                .get(&"latest".parse().unwrap())
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(
            registry.catalog(None, None).await.unwrap().repositories,
            vec![name]
        );
    }

    #[tokio::test]
    async fn build_cache_over_mirrors() {
        let registry = config(
            r#"{"cache": {
                "origin": {"mirrors": {"sources": [{"proxy": {"url": "http://localhost:5000"}}]}},
                "cache": {"local": {"storage": {"memory": {"bucket": "cache"}}, "bucket": "cache", "root": "mirror"}}
            }}"#,
        )
        .build()
        .await
        .unwrap();

        // Read-through by default.
        let blob = crate::blob::Blob::from_bytes(&b"data"[..]);
        let err = registry
            .repo(&"foo".parse().unwrap())
            .blobs
            .mount(&blob)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unsupported(_)));
    }

    #[tokio::test]
    async fn empty_mirrors() {
        let registry = config(r#"{"mirrors": {"sources": []}}"#)
            .build()
            .await
            .unwrap();
        assert!(
            registry
                .catalog(None, None)
                .await
                .unwrap()
                .repositories
                .is_empty()
        );
    }

    #[tokio::test]
    async fn bad_remote_url() {
        for url in ["not a url", "/v2/", "ftp://example.com"] {
            let err = RegistryConfig::Proxy {
                url: url.into(),
                timeout_seconds: None,
            }
            .build()
            .await
            .err()
            .expect("url should be rejected");
            assert!(matches!(err, RegistryError::InvalidConfig(_)), "{url}");
        }
    }
}
