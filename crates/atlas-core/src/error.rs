//! Error types for Atlas.
//!
//! Authorization outcomes are values, not errors. The types here cover the
//! cases that are not normal deny outcomes:
//!
//! - [`IdentityError`] - a session record that violates the identity invariant
//! - [`CollaboratorError`] - the session provider or configuration store failed
//!
//! [`ErrorCategory`] classifies everything that reaches an HTTP response and
//! fixes its status code. [`ErrorEnvelope`] is the JSON body the admin API
//! returns for every failure.
//!
//! | `ErrorCategory` | Status |
//! |---|---|
//! | `Authentication` | 401 |
//! | `Authorization` | 403 |
//! | `Configuration` | 500 |
//! | `Unavailable` | 500 |
//! | `Internal` | 500 |

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categories of errors for classification and handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No valid identity; the caller should re-authenticate.
    Authentication,
    /// Valid identity that lacks the required right.
    Authorization,
    /// Operational misconfiguration (e.g. permission matrix missing).
    Configuration,
    /// A collaborator (session provider, configuration store) failed.
    Unavailable,
    /// Unexpected defect.
    Internal,
}

impl ErrorCategory {
    /// Returns the default HTTP status code for this error category.
    #[must_use]
    pub const fn default_status_code(&self) -> StatusCode {
        match self {
            Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::Authorization => StatusCode::FORBIDDEN,
            Self::Configuration | Self::Unavailable | Self::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns `true` if the error is the server's fault rather than the caller's.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::Configuration | Self::Unavailable | Self::Internal
        )
    }
}

/// A session record that cannot be turned into a valid identity.
///
/// This is a defect, not a deny outcome: the request is aborted with 500.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The user id was present but empty.
    #[error("user id must not be empty")]
    EmptyUserId,

    /// The cached role is not one of the fixed roles.
    #[error("unknown role '{0}'")]
    UnknownRole(String),

    /// Only half of the identity was present in the session.
    #[error("incomplete identity: user id present = {has_user_id}, profile present = {has_profile}")]
    Incomplete {
        /// Whether the session carried a user id.
        has_user_id: bool,
        /// Whether the session carried a cached user snapshot.
        has_profile: bool,
    },
}

/// A failure reported by an external collaborator.
///
/// The authorization core never treats this as Allow. Guards map it to
/// `CollaboratorUnavailable` and the HTTP layer to 500.
#[derive(Debug, Error)]
#[error("{collaborator} unavailable: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed (e.g. "session provider").
    pub collaborator: String,
    /// Human-readable description.
    pub message: String,
    /// The underlying error (never exposed to clients).
    #[source]
    pub source: Option<anyhow::Error>,
}

impl CollaboratorError {
    /// Creates a collaborator error without an underlying cause.
    #[must_use]
    pub fn new(collaborator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Creates a collaborator error wrapping an underlying cause.
    pub fn with_source(
        collaborator: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            collaborator: collaborator.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error category (always [`ErrorCategory::Unavailable`]).
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        ErrorCategory::Unavailable
    }
}

/// Serializable error body for HTTP responses.
///
/// Matches the shape the admin frontend expects:
/// `{"success": false, "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always `false`.
    pub success: bool,
    /// Generic, caller-safe message.
    pub message: String,
    /// The request ID for correlation.
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorEnvelope {
    /// Creates an envelope with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            request_id: None,
        }
    }

    /// Attaches a request ID.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ErrorCategory::Authentication.default_status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCategory::Authorization.default_status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ErrorCategory::Configuration.default_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorCategory::Unavailable.default_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_server_fault() {
        assert!(!ErrorCategory::Authentication.is_server_fault());
        assert!(!ErrorCategory::Authorization.is_server_fault());
        assert!(ErrorCategory::Configuration.is_server_fault());
        assert!(ErrorCategory::Internal.is_server_fault());
    }

    #[test]
    fn test_collaborator_error_display() {
        let err = CollaboratorError::new("configuration store", "connection refused");
        assert_eq!(
            err.to_string(),
            "configuration store unavailable: connection refused"
        );
        assert_eq!(err.category(), ErrorCategory::Unavailable);
    }

    #[test]
    fn test_collaborator_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = CollaboratorError::with_source("configuration store", "read failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_identity_error_display() {
        let err = IdentityError::Incomplete {
            has_user_id: true,
            has_profile: false,
        };
        assert!(err.to_string().contains("incomplete identity"));
        assert_eq!(
            IdentityError::UnknownRole("root".into()).to_string(),
            "unknown role 'root'"
        );
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = ErrorEnvelope::new("Authentication required").with_request_id("req-1");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["message"], "Authentication required");
        assert_eq!(json["requestId"], "req-1");

        let bare = serde_json::to_value(ErrorEnvelope::new("x")).unwrap();
        assert!(bare.get("requestId").is_none());
    }
}
