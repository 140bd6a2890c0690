//! Error types for the LFS endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Result type for LFS endpoint operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing, negotiating or serving objects.
#[derive(Error, Debug)]
pub enum Error {
    /// OID is empty or would escape the object tree
    #[error("invalid OID: {0}")]
    InvalidOid(String),

    /// Repository name is empty or would escape the project root
    #[error("invalid repository name: {0}")]
    InvalidRepo(String),

    /// Object is not in the store
    #[error("object not found: {0}")]
    NotFound(String),

    /// Batch operation other than upload/download
    #[error("unsupported batch operation: {0}")]
    UnsupportedOperation(String),

    /// Client does not accept the basic transfer adapter
    #[error("no supported transfer adapter in {0:?}")]
    UnsupportedAdapter(Vec<String>),

    /// Uploaded bytes do not hash to the OID
    #[error("content hash mismatch for {oid}: got {actual}")]
    HashMismatch { oid: String, actual: String },

    /// Smart-HTTP backend process failed
    #[error("git backend error: {0}")]
    Backend(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// HTTP status this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidOid(_)
            | Error::InvalidRepo(_)
            | Error::UnsupportedOperation(_)
            | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::HashMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Backend(_) => StatusCode::BAD_GATEWAY,
            Error::UnsupportedAdapter(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::UrlParse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = serde_json::json!({ "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::InvalidOid("a/b".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NotFound("ffff".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::UnsupportedOperation("verify".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::UnsupportedAdapter(vec!["tus".into()]).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(Error::Backend("exit 128".into()).status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_into_response_status() {
        let response = Error::NotFound("deadbeef01".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
