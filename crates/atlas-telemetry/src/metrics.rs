//! Prometheus metrics for authorization.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `atlas_authz_decisions_total` | Counter | `guard`, `outcome`, `reason` | Guard evaluations |
//! | `atlas_authz_audit_dropped_total` | Counter | `sink` | Undeliverable audit entries |
//! | `atlas_permission_matrix_version` | Gauge | - | Live matrix version |
//! | `atlas_permission_matrix_reloads_total` | Counter | `result` | Reload attempts |
//!
//! The recording functions are safe to call before [`init_metrics`]; the
//! `metrics` facade discards samples until a recorder is installed.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Decision counter name.
pub const DECISIONS_TOTAL: &str = "atlas_authz_decisions_total";
/// Dropped audit entry counter name.
pub const AUDIT_DROPPED_TOTAL: &str = "atlas_authz_audit_dropped_total";
/// Matrix version gauge name.
pub const MATRIX_VERSION: &str = "atlas_permission_matrix_version";
/// Matrix reload counter name.
pub const MATRIX_RELOADS_TOTAL: &str = "atlas_permission_matrix_reloads_total";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed.
    pub enabled: bool,

    /// Address to expose metrics on (e.g. "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Installs the Prometheus recorder.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` if the address does not parse and
/// `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    let handle = PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(
        DECISIONS_TOTAL,
        "Authorization guard evaluations by outcome and reason"
    );
    describe_counter!(
        AUDIT_DROPPED_TOTAL,
        "Audit entries a sink could not deliver"
    );
    describe_gauge!(MATRIX_VERSION, "Version of the live permission matrix");
    describe_counter!(
        MATRIX_RELOADS_TOTAL,
        "Permission matrix reload attempts by result"
    );
}

/// Records one guard evaluation.
///
/// `outcome` is `allow` or `deny`; `reason` is the deny reason or `granted`.
pub fn record_decision(guard: &str, outcome: &'static str, reason: &'static str) {
    counter!(
        DECISIONS_TOTAL,
        "guard" => guard.to_string(),
        "outcome" => outcome,
        "reason" => reason
    )
    .increment(1);
}

/// Records an audit entry that a sink dropped.
pub fn record_audit_dropped(sink: &'static str) {
    counter!(AUDIT_DROPPED_TOTAL, "sink" => sink).increment(1);
}

/// Records that a new matrix became live.
#[allow(clippy::cast_precision_loss)]
pub fn record_matrix_swap(version: u64) {
    gauge!(MATRIX_VERSION).set(version as f64);
    counter!(MATRIX_RELOADS_TOTAL, "result" => "applied").increment(1);
}

/// Records a reload that was rejected and left the live matrix untouched.
pub fn record_matrix_reload_failed() {
    counter!(MATRIX_RELOADS_TOTAL, "result" => "rejected").increment(1);
}
