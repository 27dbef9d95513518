//! # Container registry storage
//!
//! Storage and resolution of registry content: blobs and manifests addressed
//! by digest, tags, and the catalog of repositories.
//!
//! Every backend implements the same contracts ([`Blobs`], [`Manifests`] and
//! [`Registry`]), so backends compose:
//!
//! - [`LocalRegistry`] keeps content in a [`storage`] bucket, placed by a [`Layout`].
//! - [`ProxyRegistry`] reads from a remote registry over HTTP.
//! - [`MultiReadRegistry`] reads from the first of several registries which has the content.
//! - [`CacheRegistry`] puts a cache in front of an origin registry.
//!
//! A deployment usually picks its composition with a [`RegistryConfig`].
//!
//! ## Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use registry_store::{Layout, LocalRegistry, Registry};
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage: storage::Storage = MemoryStorage::with_buckets(&["registry"]).into();
//! let registry = LocalRegistry::new(storage.bucket("registry"), Layout::default());
//!
//! let repo = registry.repo(&"library/alpine".parse()?);
//! let manifest = repo
//!     .manifests
//!     .put(&"latest".parse()?, Bytes::from_static(br#"{"schemaVersion":2}"#))
//!     .await?;
//! println!("pushed {}", manifest.digest());
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod cache;
pub mod config;
pub mod digest;
mod error;
#[cfg(test)]
mod fake;
pub mod layout;
pub mod local;
pub mod manifest;
pub mod multi;
pub mod name;
pub mod page;
pub mod proxy;
pub mod store;

pub use blob::{Blob, BlobReader};
pub use cache::{CacheMode, CacheRegistry};
pub use config::RegistryConfig;
pub use digest::Digest;
pub use error::{BoxError, RegistryError, RegistryResult};
pub use layout::Layout;
pub use local::LocalRegistry;
pub use manifest::Manifest;
pub use multi::MultiReadRegistry;
pub use name::{ManifestRef, RepoName, Tag};
pub use page::{Catalog, Tags};
pub use proxy::{ProxyRegistry, RemoteClient};
pub use store::{Blobs, Manifests, Registry, Repo};
