//! Audit records for authorization decisions.
//!
//! Every guard evaluation produces exactly one [`AuditEntry`], handed to an
//! [`AuditSink`] before the decision is returned. Sinks are fire-and-forget:
//! they return nothing, never block the request path, and swallow their own
//! failures after logging them locally.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use atlas_core::{RequestId, Role};
use atlas_telemetry::metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::policy::{Decision, DenyReason};

/// Principal recorded for requests without an identity.
pub const ANONYMOUS: &str = "anonymous";

/// One authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// Request the decision belongs to, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// `"anonymous"` or `"user:<id>"`.
    pub principal: String,
    /// Role of the caller, if authenticated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Guard name.
    pub guard: String,
    /// The guard's checks, e.g. `authenticated + permission:canManageUsers`.
    pub capability: String,
    /// `"allow"` or `"deny"`.
    pub outcome: &'static str,
    /// Deny reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenyReason>,
    /// Version of the matrix consulted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix_version: Option<u64>,
}

impl AuditEntry {
    /// Reconstructs the decision.
    #[must_use]
    pub fn decision(&self) -> Decision {
        self.reason.map_or(Decision::Allow, Decision::Deny)
    }

    /// Label value for the reason: the deny reason, or `granted`.
    #[must_use]
    pub fn reason_label(&self) -> &'static str {
        self.reason.as_ref().map_or("granted", DenyReason::as_str)
    }
}

/// Receives audit entries.
///
/// Implementations must not panic and must not block.
pub trait AuditSink: Send + Sync {
    /// Records one entry.
    fn record(&self, entry: &AuditEntry);
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn record(&self, entry: &AuditEntry) {
        (**self).record(entry);
    }
}

/// Emits entries as structured `tracing` events.
///
/// Allows log at `debug`, caller-fault denies at `info`, and server-fault
/// denies at `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: &AuditEntry) {
        let request_id = entry.request_id.map(|id| id.to_string()).unwrap_or_default();
        let role = entry.role.map_or("", |r| r.as_str());
        let matrix_version = entry.matrix_version.unwrap_or_default();

        match entry.reason {
            None => debug!(
                target: "atlas::audit",
                request_id = %request_id,
                user_id = %entry.principal,
                role,
                guard = %entry.guard,
                capability = %entry.capability,
                outcome = entry.outcome,
                matrix_version,
                "access granted"
            ),
            Some(reason) if reason.category().is_server_fault() => error!(
                target: "atlas::audit",
                request_id = %request_id,
                user_id = %entry.principal,
                role,
                guard = %entry.guard,
                capability = %entry.capability,
                outcome = entry.outcome,
                reason = reason.as_str(),
                "access denied by server fault"
            ),
            Some(reason) => info!(
                target: "atlas::audit",
                request_id = %request_id,
                user_id = %entry.principal,
                role,
                guard = %entry.guard,
                capability = %entry.capability,
                outcome = entry.outcome,
                reason = reason.as_str(),
                matrix_version,
                "access denied"
            ),
        }
    }
}

/// Counts decisions in `atlas_authz_decisions_total`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAuditSink;

impl AuditSink for MetricsAuditSink {
    fn record(&self, entry: &AuditEntry) {
        metrics::record_decision(&entry.guard, entry.outcome, entry.reason_label());
    }
}

/// Forwards entries to a bounded channel.
///
/// A full or closed channel drops the entry with a warning.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl ChannelAuditSink {
    /// Creates a sink and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEntry>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, entry: &AuditEntry) {
        if let Err(err) = self.tx.try_send(entry.clone()) {
            let cause = match err {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            warn!(guard = %entry.guard, cause, "dropping audit entry");
            metrics::record_audit_dropped("channel");
        }
    }
}

/// Keeps entries in memory.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded entry.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Returns the most recent entry.
    #[must_use]
    pub fn last(&self) -> Option<AuditEntry> {
        self.entries.lock().last().cloned()
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Discards all entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditEntry) {
        self.entries.lock().push(entry.clone());
    }
}

/// Forwards every entry to each inner sink in order.
#[derive(Clone, Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    /// Creates a sink with no targets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a target.
    #[must_use]
    pub fn with(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns `true` if there are no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutAuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutAuditSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl AuditSink for FanoutAuditSink {
    fn record(&self, entry: &AuditEntry) {
        for sink in &self.sinks {
            sink.record(entry);
        }
    }
}

/// Drains a [`ChannelAuditSink`] into a JSON-lines file.
///
/// Write failures are logged and the entry skipped; the task ends when every
/// sender is dropped.
#[derive(Debug)]
pub struct AuditLogWriter {
    path: PathBuf,
}

impl AuditLogWriter {
    /// Creates a writer appending to `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path being appended to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Spawns the drain task on the current runtime.
    #[must_use]
    pub fn spawn(self, mut rx: mpsc::Receiver<AuditEntry>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await;
            let mut file = match file {
                Ok(file) => file,
                Err(err) => {
                    error!(path = %self.path.display(), error = %err, "cannot open audit log");
                    return;
                }
            };

            while let Some(entry) = rx.recv().await {
                let mut line = match serde_json::to_vec(&entry) {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(error = %err, "cannot serialize audit entry");
                        continue;
                    }
                };
                line.push(b'\n');
                if let Err(err) = file.write_all(&line).await {
                    warn!(path = %self.path.display(), error = %err, "cannot write audit entry");
                    metrics::record_audit_dropped("file");
                }
            }

            if let Err(err) = file.flush().await {
                warn!(path = %self.path.display(), error = %err, "cannot flush audit log");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reason: Option<DenyReason>) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            request_id: Some(RequestId::new()),
            principal: "user:u-1".to_string(),
            role: Some(Role::Support),
            guard: "users.list".to_string(),
            capability: "authenticated + permission:canManageUsers".to_string(),
            outcome: if reason.is_some() { "deny" } else { "allow" },
            reason,
            matrix_version: Some(3),
        }
    }

    #[test]
    fn test_entry_decision() {
        assert_eq!(entry(None).decision(), Decision::Allow);
        let denied = entry(Some(DenyReason::InsufficientPermission));
        assert_eq!(
            denied.decision(),
            Decision::Deny(DenyReason::InsufficientPermission)
        );
        assert_eq!(denied.reason_label(), "insufficient_permission");
        assert_eq!(entry(None).reason_label(), "granted");
    }

    #[test]
    fn test_entry_serialization() {
        let json = serde_json::to_value(entry(Some(DenyReason::InsufficientRole))).unwrap();
        assert_eq!(json["principal"], "user:u-1");
        assert_eq!(json["role"], "support");
        assert_eq!(json["outcome"], "deny");
        assert_eq!(json["reason"], "insufficient_role");
        assert_eq!(json["matrix_version"], 3);
    }

    #[test]
    fn test_memory_sink_clones_share_buffer() {
        let sink = MemoryAuditSink::new();
        let view = sink.clone();
        sink.record(&entry(None));
        assert_eq!(view.len(), 1);
        view.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = MemoryAuditSink::new();
        let b = MemoryAuditSink::new();
        let fanout = FanoutAuditSink::new()
            .with(a.clone())
            .with(b.clone())
            .with(TracingAuditSink)
            .with(MetricsAuditSink);

        fanout.record(&entry(Some(DenyReason::PermissionMatrixMissing)));

        assert_eq!(fanout.len(), 4);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelAuditSink::new(1);
        sink.record(&entry(None));
        sink.record(&entry(Some(DenyReason::NotAuthenticated)));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.reason, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_sink_survives_closed_receiver() {
        let (sink, rx) = ChannelAuditSink::new(4);
        drop(rx);
        sink.record(&entry(None));
    }

    #[tokio::test]
    async fn test_log_writer_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let (sink, rx) = ChannelAuditSink::new(8);
        let task = AuditLogWriter::new(&path).spawn(rx);

        sink.record(&entry(None));
        sink.record(&entry(Some(DenyReason::InsufficientPermission)));
        drop(sink);
        task.await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["reason"], "insufficient_permission");
    }
}
