//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::digest::Digest;

/// A boxed error from a transport or other opaque source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Invalid digest format
    #[error("invalid digest: {0}")]
    MalformedDigest(String),

    /// Invalid tag name
    #[error("invalid tag name: {0}")]
    InvalidTagName(String),

    /// Invalid repository name
    #[error("invalid repository name: {0}")]
    InvalidRepoName(String),

    /// Content does not hash to the declared digest
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch {
        /// Declared digest
        expected: Digest,
        /// Digest of the content actually received
        computed: Digest,
    },

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The store does not accept this operation
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The remote registry answered with a status the protocol does not allow here
    #[error("unexpected status from remote registry: {status}")]
    UnexpectedRemoteStatus {
        /// Status code returned by the remote
        status: StatusCode,
    },

    /// The remote registry could not be reached
    #[error("remote registry unavailable: {0}")]
    RemoteUnavailable(#[source] BoxError),

    /// The remote registry sent a document or header we could not use
    #[error("invalid response from remote registry: {0}")]
    InvalidRemoteResponse(String),

    /// The registry configuration cannot be built
    #[error("invalid registry configuration: {0}")]
    InvalidConfig(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RegistryError::MalformedDigest(_)
            | RegistryError::InvalidTagName(_)
            | RegistryError::InvalidRepoName(_)
            | RegistryError::InvalidManifest(_)
            | RegistryError::DigestMismatch { .. } => StatusCode::BAD_REQUEST,
            RegistryError::Unsupported(_) => StatusCode::METHOD_NOT_ALLOWED,
            RegistryError::UnexpectedRemoteStatus { .. }
            | RegistryError::RemoteUnavailable(_)
            | RegistryError::InvalidRemoteResponse(_) => StatusCode::BAD_GATEWAY,
            RegistryError::InvalidConfig(_) | RegistryError::Storage(_) | RegistryError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get the error code for OCI error responses
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::MalformedDigest(_) => "DIGEST_INVALID",
            RegistryError::DigestMismatch { .. } => "DIGEST_INVALID",
            RegistryError::InvalidTagName(_) => "TAG_INVALID",
            RegistryError::InvalidManifest(_) => "MANIFEST_INVALID",
            RegistryError::InvalidRepoName(_) => "NAME_INVALID",
            RegistryError::Unsupported(_) => "UNSUPPORTED",
            RegistryError::UnexpectedRemoteStatus { .. }
            | RegistryError::RemoteUnavailable(_)
            | RegistryError::InvalidRemoteResponse(_)
            | RegistryError::InvalidConfig(_)
            | RegistryError::Storage(_)
            | RegistryError::Io(_) => "UNKNOWN",
        }
    }

    /// Whether this error describes a remote source, as opposed to local storage or bad input.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            RegistryError::UnexpectedRemoteStatus { .. }
                | RegistryError::RemoteUnavailable(_)
                | RegistryError::InvalidRemoteResponse(_)
        )
    }
}

/// OCI error response format
#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        let body = ErrorResponse {
            errors: vec![ErrorDetail { code, message }],
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt as _;

    #[test]
    fn codes_follow_the_distribution_protocol() {
        let mismatch = RegistryError::DigestMismatch {
            expected: Digest::sha256(b"a"),
            computed: Digest::sha256(b"b"),
        };
        assert_eq!(mismatch.error_code(), "DIGEST_INVALID");
        assert_eq!(mismatch.status_code(), StatusCode::BAD_REQUEST);

        let unsupported = RegistryError::Unsupported("put on a read-only proxy");
        assert_eq!(unsupported.error_code(), "UNSUPPORTED");

        let invalid = RegistryError::InvalidManifest("not json".into());
        assert_eq!(invalid.error_code(), "MANIFEST_INVALID");

        let tag = RegistryError::InvalidTagName("-latest".into());
        assert_eq!(tag.error_code(), "TAG_INVALID");
        assert_eq!(tag.status_code(), StatusCode::BAD_REQUEST);

        let remote = RegistryError::UnexpectedRemoteStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert!(remote.is_remote());
        assert_eq!(remote.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn renders_error_document() {
        let response = RegistryError::InvalidRepoName("UPPER".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["errors"][0]["code"], "NAME_INVALID");
        assert_eq!(
            json["errors"][0]["message"],
            "invalid repository name: UPPER"
        );
    }
}
