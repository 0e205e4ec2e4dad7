//! Service-level errors.

use atlas_authz::AuthzError;
use atlas_config::ConfigError;
use atlas_telemetry::TelemetryError;
use thiserror::Error;

/// Errors raised while building or starting the admin authorization service.
#[derive(Debug, Error)]
pub enum AtlasError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The authorizer failed to start.
    #[error("authorization error: {0}")]
    Authz(#[from] AuthzError),

    /// Logging or metrics could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The service was started twice.
    #[error("service already started")]
    AlreadyStarted,
}

/// Result type for service operations.
pub type AtlasResult<T> = Result<T, AtlasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_error() {
        let err: AtlasError =
            ConfigError::validation_error("service.name must not be empty").into();
        assert!(matches!(err, AtlasError::Config(_)));
        assert!(err.to_string().contains("service.name"));
    }

    #[test]
    fn test_from_authz_error() {
        let err: AtlasError = AuthzError::invalid_matrix("not an object").into();
        assert!(err.to_string().starts_with("authorization error"));
    }
}
