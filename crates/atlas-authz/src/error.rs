//! Error types for the authorization crate.
//!
//! Deny outcomes are [`Decision`](crate::Decision) values. `AuthzError` covers
//! administrative operations (matrix replacement and reload) and the fatal
//! defects that abort a request.

use std::path::PathBuf;

use atlas_core::{CollaboratorError, ErrorCategory, IdentityError};
use thiserror::Error;

use crate::policy::DenyReason;

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Errors that can occur outside the normal allow/deny flow.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// A session record violated the identity invariant.
    #[error("malformed identity: {0}")]
    MalformedIdentity(#[from] IdentityError),

    /// The session provider or configuration store failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// The caller is not allowed to perform an administrative operation.
    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    /// A permission matrix document was not a JSON object of role entries.
    #[error("invalid permission matrix: {0}")]
    InvalidMatrix(String),

    /// Reading or writing a matrix file failed.
    #[error("failed to access {path}: {source}")]
    Io {
        /// File that was being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthzError {
    /// Create an I/O error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid matrix error.
    pub fn invalid_matrix(message: impl Into<String>) -> Self {
        Self::InvalidMatrix(message.into())
    }

    /// Check if this is an access denied error.
    pub const fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied(_))
    }

    /// Check if the error originated in a collaborator.
    pub const fn is_collaborator(&self) -> bool {
        matches!(self, Self::Collaborator(_))
    }

    /// Returns the error category, which fixes the HTTP status.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AccessDenied(reason) => reason.category(),
            Self::Collaborator(_) => ErrorCategory::Unavailable,
            Self::InvalidMatrix(_) | Self::Json(_) => ErrorCategory::Configuration,
            Self::MalformedIdentity(_) | Self::Io { .. } => ErrorCategory::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_access_denied_error() {
        let err = AuthzError::AccessDenied(DenyReason::InsufficientPermission);
        assert!(err.is_access_denied());
        assert_eq!(err.category().default_status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_malformed_identity_is_internal() {
        let err = AuthzError::from(IdentityError::EmptyUserId);
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert!(err.to_string().starts_with("malformed identity"));
    }

    #[test]
    fn test_collaborator_error() {
        let err = AuthzError::from(CollaboratorError::new("session provider", "timed out"));
        assert!(err.is_collaborator());
        assert_eq!(err.to_string(), "session provider unavailable: timed out");
        assert_eq!(
            err.category().default_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_io_error_names_path() {
        let err = AuthzError::io(
            "/var/lib/atlas/permissions.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("permissions.json"));
    }
}
