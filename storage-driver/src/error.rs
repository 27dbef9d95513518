use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use tracing_error::SpanTrace;

/// Categorizes storage errors by their semantic meaning, independent of
/// the underlying storage backend implementation.
///
/// Callers decide how to react from the kind alone: in particular, a missing
/// key is reported as [`StorageErrorKind::NotFound`] by every driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The requested key or bucket does not exist.
    NotFound,

    /// The caller lacks permission to perform the requested operation.
    PermissionDenied,

    /// The operation failed due to I/O errors (network, disk, etc.).
    Io,

    /// The backing storage service is temporarily unavailable.
    ServiceUnavailable,

    /// Authentication credentials have expired and need refresh.
    AuthExpired,

    /// The request was invalid (bad parameters, malformed data, etc.).
    InvalidRequest,

    /// The operation was retried multiple times but continued to fail.
    RetriesExhausted,

    /// Data serialization or deserialization failed.
    SerializationError,

    /// An unexpected or uncategorized error occurred.
    Other,
}

impl StorageErrorKind {
    /// Whether this kind usually describes a transient condition.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageErrorKind::ServiceUnavailable
                | StorageErrorKind::AuthExpired
                | StorageErrorKind::Io
        )
    }

    /// Map an I/O error kind onto the storage taxonomy.
    pub fn from_io(kind: std::io::ErrorKind) -> Self {
        match kind {
            std::io::ErrorKind::NotFound => StorageErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => StorageErrorKind::PermissionDenied,
            _ => StorageErrorKind::Io,
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorKind::NotFound => write!(f, "not found"),
            StorageErrorKind::PermissionDenied => write!(f, "permission denied"),
            StorageErrorKind::Io => write!(f, "I/O error"),
            StorageErrorKind::ServiceUnavailable => write!(f, "service unavailable"),
            StorageErrorKind::AuthExpired => write!(f, "authentication expired"),
            StorageErrorKind::InvalidRequest => write!(f, "invalid request"),
            StorageErrorKind::RetriesExhausted => write!(f, "retries exhausted"),
            StorageErrorKind::SerializationError => write!(f, "serialization error"),
            StorageErrorKind::Other => write!(f, "other error"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    /// Controlled by `RUST_BACKTRACE`.
    backtrace: Backtrace,

    /// The span context where the error was created.
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// Storage error with its kind, the engine that produced it, optional
/// bucket / path / context, and the traces captured at creation.
///
/// # Example
///
/// ```rust
/// use storage_driver::{StorageError, StorageErrorKind};
///
/// let error = StorageError::builder(
///     "memory",
///     StorageErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "no such key"),
/// )
/// .bucket("registry")
/// .path("docker/registry/v2/repositories")
/// .build();
///
/// assert_eq!(error.kind(), StorageErrorKind::NotFound);
/// ```
#[derive(Debug)]
pub struct StorageError {
    kind: StorageErrorKind,
    engine: &'static str,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl StorageError {
    /// Create a new storage error with the minimum required information.
    pub fn new<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(engine, kind, error).build()
    }

    /// Create a builder for a storage error with bucket, path or context attached.
    pub fn builder<E>(engine: &'static str, kind: StorageErrorKind, error: E) -> StorageErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        StorageErrorBuilder {
            engine,
            kind,
            source: error.into(),
            bucket: None,
            path: None,
            context: None,
        }
    }

    /// Returns a boxed closure that creates a storage error from a downstream error,
    /// for use with `.map_err()`.
    pub fn with<E>(
        engine: &'static str,
        kind: StorageErrorKind,
    ) -> Box<dyn FnOnce(E) -> StorageError + Send + Sync>
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Box::new(move |error: E| StorageError::new(engine, kind, error))
    }

    /// Build an error from an I/O error, deriving the kind from the I/O error kind.
    #[track_caller]
    pub fn io(engine: &'static str, error: std::io::Error) -> Self {
        let kind = StorageErrorKind::from_io(error.kind());
        StorageError::new(engine, kind, error)
    }

    /// Returns the error kind.
    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    /// Whether the error reports a missing key or bucket.
    pub fn is_not_found(&self) -> bool {
        self.kind == StorageErrorKind::NotFound
    }

    /// Returns the storage engine name.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// Returns the bucket name, if available.
    pub fn bucket(&self) -> Option<&str> {
        self.bucket.as_deref()
    }

    /// Returns the file path, if available.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Returns additional context, if available.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Returns whether this error is likely retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns a reference to the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Returns a reference to the captured span trace.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage error [{}] from {}", self.kind, self.engine)?;

        if let Some(bucket) = &self.bucket {
            write!(f, " (bucket: {})", bucket)?;
        }

        if let Some(path) = &self.path {
            write!(f, " (path: {})", path)?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({})", context)?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for a [`StorageError`] with optional context fields.
#[derive(Debug)]
pub struct StorageErrorBuilder {
    kind: StorageErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    bucket: Option<String>,
    path: Option<String>,
    context: Option<String>,
}

impl StorageErrorBuilder {
    /// Set the bucket name.
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Set the file path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set additional context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the `StorageError`.
    #[track_caller]
    pub fn build(self) -> StorageError {
        StorageError {
            kind: self.kind,
            engine: self.engine,
            bucket: self.bucket,
            path: self.path,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_not_found() {
        let err = StorageError::io(
            "local",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());

        let err = StorageError::io(
            "local",
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"),
        );
        assert_eq!(err.kind(), StorageErrorKind::Io);
        assert!(err.is_retryable());
    }

    #[test]
    fn display_includes_context() {
        let err = StorageError::builder(
            "memory",
            StorageErrorKind::NotFound,
            std::io::Error::new(std::io::ErrorKind::NotFound, "Path not found: a/b"),
        )
        .bucket("registry")
        .path("a/b")
        .context("path not found")
        .build();

        assert_eq!(
            err.to_string(),
            "Storage error [not found] from memory (bucket: registry) (path: a/b) (path not found): Path not found: a/b"
        );
    }
}
