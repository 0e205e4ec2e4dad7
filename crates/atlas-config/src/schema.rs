//! Configuration schema sections.
//!
//! Every section rejects unknown fields and fills unset fields with the
//! defaults below, so a partial file is always a valid starting point.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Service identity and listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Service name used in logs and metrics.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Deployment environment (e.g. "development", "production").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Address the admin API listens on.
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            environment: default_environment(),
            http_addr: default_http_addr(),
        }
    }
}

fn default_service_name() -> String {
    "atlas-admin".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (for production).
    #[default]
    Json,
    /// Pretty format (for development).
    Pretty,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level filter (e.g. "info", "atlas_authz=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include file and line in log lines.
    #[serde(default)]
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
            include_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Start the exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Address the exporter listens on.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

/// Observability settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TelemetrySection {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Permission matrix and audit settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthorizationConfig {
    /// JSON document holding the permission matrix. `None` keeps the matrix
    /// in process memory only.
    #[serde(default = "default_matrix_path")]
    pub matrix_path: Option<PathBuf>,

    /// Store the built-in default matrix when none is stored yet.
    #[serde(default = "default_true")]
    pub materialize_default_matrix: bool,

    /// Reload the matrix when its file is edited outside the service.
    #[serde(default = "default_true")]
    pub watch_matrix_file: bool,

    /// Quiet period before a file change triggers a reload.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// Bounded queue between guard evaluation and the audit log writer.
    #[serde(default = "default_audit_channel_capacity")]
    pub audit_channel_capacity: usize,

    /// Append audit entries as JSON lines to this file.
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,

    /// Count decisions in the metrics registry.
    #[serde(default = "default_true")]
    pub emit_metrics: bool,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            matrix_path: default_matrix_path(),
            materialize_default_matrix: true,
            watch_matrix_file: true,
            watch_debounce_ms: default_watch_debounce_ms(),
            audit_channel_capacity: default_audit_channel_capacity(),
            audit_log_path: None,
            emit_metrics: true,
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_matrix_path() -> Option<PathBuf> {
    Some(PathBuf::from("config/permissions.json"))
}

fn default_watch_debounce_ms() -> u64 {
    250
}

fn default_audit_channel_capacity() -> usize {
    1024
}

/// How callers present their session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Cookie carrying the session token.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Header carrying the session token for non-browser clients.
    #[serde(default = "default_header_name")]
    pub header_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            header_name: default_header_name(),
        }
    }
}

fn default_cookie_name() -> String {
    "connect.sid".to_string()
}

fn default_header_name() -> String {
    "x-session-token".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_default() {
        let config = ServiceConfig::default();
        assert_eq!(config.name, "atlas-admin");
        assert_eq!(config.environment, "development");
        assert_eq!(config.http_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_service_config_partial() {
        let config: ServiceConfig = toml::from_str(r#"http_addr = "127.0.0.1:3000""#).unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:3000");
        assert_eq!(config.name, "atlas-admin");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<SessionConfig, _> = toml::from_str(r#"cookie = "sid""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_format_deserialize() {
        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);
        assert!(serde_json::from_str::<LogFormat>(r#""xml""#).is_err());
    }

    #[test]
    fn test_metrics_disabled_by_default() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.addr, "0.0.0.0:9090");
    }

    #[test]
    fn test_authorization_defaults() {
        let config = AuthorizationConfig::default();
        assert_eq!(
            config.matrix_path.as_deref(),
            Some(std::path::Path::new("config/permissions.json"))
        );
        assert!(config.materialize_default_matrix);
        assert!(config.watch_matrix_file);
        assert_eq!(config.audit_channel_capacity, 1024);
        assert!(config.audit_log_path.is_none());
    }

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.cookie_name, "connect.sid");
        assert_eq!(config.header_name, "x-session-token");
    }
}
