//! Observability for the Atlas admin backend.
//!
//! This crate provides the two observability channels the authorization layer
//! reports through:
//!
//! - **Logging**: Structured JSON (or pretty) logs via `tracing-subscriber`
//! - **Metrics**: Prometheus-format counters via the `metrics` crate
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `atlas_authz_decisions_total` | Counter | `guard`, `outcome`, `reason` | Guard evaluations |
//! | `atlas_authz_audit_dropped_total` | Counter | `sink` | Audit entries a sink could not deliver |
//! | `atlas_permission_matrix_version` | Gauge | - | Version of the live permission matrix |
//! | `atlas_permission_matrix_reloads_total` | Counter | `result` | Matrix reload attempts |
//!
//! # Example
//!
//! ```rust,ignore
//! use atlas_telemetry::{init_telemetry, LogConfig, MetricsConfig, TelemetryConfig};
//!
//! let config = TelemetryConfig::for_service(
//!     "atlas-admin",
//!     "production",
//!     LogConfig::production(),
//!     MetricsConfig { enabled: true, addr: "0.0.0.0:9090".to_string() },
//! );
//!
//! init_telemetry(&config)?;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging and metrics.
///
/// Logging is initialized first so that metrics exporter failures are logged.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryResult<()> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    tracing::info!(
        service.name = %config.service_name,
        environment = %config.environment,
        "telemetry initialized"
    );
    Ok(())
}
