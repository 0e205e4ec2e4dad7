//! Telemetry configuration.

use crate::logging::LogConfig;
use crate::metrics::MetricsConfig;

/// What [`init_telemetry`](crate::init_telemetry) installs, for one service.
///
/// Built from the service's own settings; the service name is stamped onto
/// the log configuration so every log line carries it.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name.
    pub service_name: String,
    /// Deployment environment, logged once at startup.
    pub environment: String,
    /// Prometheus exporter.
    pub metrics: MetricsConfig,
    /// Log subscriber.
    pub logging: LogConfig,
}

impl TelemetryConfig {
    /// Telemetry for `service_name` running in `environment`.
    #[must_use]
    pub fn for_service(
        service_name: impl Into<String>,
        environment: impl Into<String>,
        mut logging: LogConfig,
        metrics: MetricsConfig,
    ) -> Self {
        let service_name = service_name.into();
        logging.service_name.clone_from(&service_name);
        Self {
            service_name,
            environment: environment.into(),
            metrics,
            logging,
        }
    }

    /// Turns both subsystems off.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.logging.enabled = false;
        self.metrics.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_reaches_log_fields() {
        let config = TelemetryConfig::for_service(
            "atlas-staging",
            "staging",
            LogConfig::production(),
            MetricsConfig::default(),
        );

        assert_eq!(config.logging.service_name, "atlas-staging");
        assert_eq!(config.environment, "staging");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_disabled() {
        let config = TelemetryConfig::for_service(
            "atlas-admin",
            "test",
            LogConfig::development(),
            MetricsConfig {
                enabled: true,
                addr: "127.0.0.1:9464".to_string(),
            },
        )
        .disabled();

        assert!(!config.logging.enabled);
        assert!(!config.metrics.enabled);
    }
}
