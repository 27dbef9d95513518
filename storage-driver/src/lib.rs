//! # Storage drivers
//!
//! The key-value capability every storage backend provides: put, get, list,
//! delete and atomic rename of byte content under hierarchical keys.

mod driver;
mod error;

pub use driver::Driver;
pub use driver::Metadata;
pub use driver::Reader;
pub use driver::Writer;
pub use error::{StorageError, StorageErrorBuilder, StorageErrorKind};
