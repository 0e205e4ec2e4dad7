//! Main configuration types.
//!
//! This module provides the top-level [`AtlasConfig`] struct and its builder.

use std::net::SocketAddr;
use std::time::Duration;

use atlas_telemetry::{LogConfig, MetricsConfig as TelemetryMetrics, TelemetryConfig};
use serde::{Deserialize, Serialize};

use crate::{
    AuthorizationConfig, ConfigError, LogFormat, ServiceConfig, SessionConfig, TelemetrySection,
};

/// Complete configuration of the admin authorization service.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load it from files and
/// environment variables.
///
/// # Example
///
/// ```
/// use atlas_config::AtlasConfig;
///
/// let config = AtlasConfig::default();
/// assert_eq!(config.session.cookie_name, "connect.sid");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct AtlasConfig {
    /// Service identity and listener.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub telemetry: TelemetrySection,

    /// Permission matrix and audit.
    #[serde(default)]
    pub authorization: AuthorizationConfig,

    /// Session token transport.
    #[serde(default)]
    pub session: SessionConfig,
}

impl AtlasConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> AtlasConfigBuilder {
        AtlasConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unparsable address, an
    /// empty name, or a zero-sized audit channel, and
    /// [`ConfigError::ValidationError`] when the matrix watcher is enabled
    /// without a matrix file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::invalid_value("service.name", "must not be empty"));
        }

        if self.service.http_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "service.http_addr",
                format!("invalid socket address: {}", self.service.http_addr),
            ));
        }

        if self.telemetry.metrics.enabled
            && self.telemetry.metrics.addr.parse::<SocketAddr>().is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        let authz = &self.authorization;
        if authz
            .matrix_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::invalid_value(
                "authorization.matrix_path",
                "must not be empty",
            ));
        }
        if authz.watch_matrix_file && authz.matrix_path.is_none() {
            return Err(ConfigError::validation_error(
                "authorization.watch_matrix_file requires authorization.matrix_path",
            ));
        }
        if authz.audit_channel_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "authorization.audit_channel_capacity",
                "must be greater than zero",
            ));
        }

        for (field, value) in [
            ("session.cookie_name", &self.session.cookie_name),
            ("session.header_name", &self.session.header_name),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid_value(field, "must not be empty"));
            }
        }
        if http::HeaderName::from_bytes(self.session.header_name.as_bytes()).is_err() {
            return Err(ConfigError::invalid_value(
                "session.header_name",
                format!("invalid header name: {}", self.session.header_name),
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty debug logs, and the default matrix is stored on first start.
    ///
    /// # Example
    ///
    /// ```
    /// use atlas_config::AtlasConfig;
    ///
    /// let config = AtlasConfig::development();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.service.environment = "development".to_string();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = LogFormat::Pretty;
        config.telemetry.logging.include_location = true;
        config.authorization.materialize_default_matrix = true;
        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON logs, metrics exported, and the matrix must already exist in
    /// the store: a missing one keeps every non-admin permission check
    /// failing closed until an operator creates it.
    ///
    /// # Example
    ///
    /// ```
    /// use atlas_config::AtlasConfig;
    ///
    /// let config = AtlasConfig::production();
    /// assert!(!config.authorization.materialize_default_matrix);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.service.environment = "production".to_string();
        config.telemetry.logging.format = LogFormat::Json;
        config.telemetry.metrics.enabled = true;
        config.authorization.materialize_default_matrix = false;
        config.authorization.audit_log_path = Some("logs/audit.jsonl".into());
        config
    }

    /// Debounce applied to matrix file changes.
    #[must_use]
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.authorization.watch_debounce_ms)
    }

    /// Settings for [`atlas_telemetry::init_telemetry`].
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let logging = &self.telemetry.logging;
        let development = logging.format == LogFormat::Pretty;
        let log = LogConfig {
            enabled: logging.enabled,
            level: logging.level.clone(),
            json_format: !development,
            span_events: development,
            file_line_info: logging.include_location,
            ..LogConfig::default()
        };

        TelemetryConfig::for_service(
            self.service.name.clone(),
            self.service.environment.clone(),
            log,
            TelemetryMetrics {
                enabled: self.telemetry.metrics.enabled,
                addr: self.telemetry.metrics.addr.clone(),
            },
        )
    }
}

/// Builder for [`AtlasConfig`].
#[derive(Debug, Default)]
pub struct AtlasConfigBuilder {
    service: Option<ServiceConfig>,
    telemetry: Option<TelemetrySection>,
    authorization: Option<AuthorizationConfig>,
    session: Option<SessionConfig>,
}

impl AtlasConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service section.
    #[must_use]
    pub fn service(mut self, config: ServiceConfig) -> Self {
        self.service = Some(config);
        self
    }

    /// Set the telemetry section.
    #[must_use]
    pub fn telemetry(mut self, config: TelemetrySection) -> Self {
        self.telemetry = Some(config);
        self
    }

    /// Set the authorization section.
    #[must_use]
    pub fn authorization(mut self, config: AuthorizationConfig) -> Self {
        self.authorization = Some(config);
        self
    }

    /// Set the session section.
    #[must_use]
    pub fn session(mut self, config: SessionConfig) -> Self {
        self.session = Some(config);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> AtlasConfig {
        AtlasConfig {
            service: self.service.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
            authorization: self.authorization.unwrap_or_default(),
            session: self.session.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn build_validated(self) -> Result<AtlasConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
