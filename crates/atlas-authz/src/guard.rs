//! Guards: ordered chains of policy checks.
//!
//! A [`Guard`] is built once at wiring time and shared by every request to
//! the operation it protects. Evaluation walks the checks in declared order
//! and stops at the first deny; reasons are never aggregated and checks are
//! never reordered.
//!
//! The matrix is fetched lazily. A chain that denies before its permission
//! check, or that reaches one with an anonymous or admin caller, never asks
//! the [`MatrixSource`] for a snapshot.
//!
//! # Example
//!
//! ```
//! use atlas_authz::{Decision, DenyReason, Guard, GuardRequest, MemoryAuditSink};
//! use atlas_authz::{MatrixHandle, Permission};
//!
//! let guard = Guard::builder("users.list")
//!     .authenticated()
//!     .permission(Permission::CanManageUsers)
//!     .build();
//!
//! let audit = MemoryAuditSink::new();
//! let decision = guard.evaluate(&GuardRequest::anonymous(), &MatrixHandle::new(), &audit);
//! assert_eq!(decision, Decision::Deny(DenyReason::NotAuthenticated));
//! assert_eq!(audit.len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use atlas_core::{IdentityContext, RequestId, RoleSet};
use chrono::Utc;
use tracing::warn;

use crate::audit::{AuditEntry, AuditSink, ANONYMOUS};
use crate::matrix::{MatrixSource, VersionedMatrix};
use crate::permission::PermissionRef;
use crate::policy::{self, Decision, DenyReason};

/// One step of a guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// The caller must have an identity.
    Authenticated,
    /// The caller's role must be in the set.
    Roles(RoleSet),
    /// The matrix must grant the permission to the caller's role.
    Permission(PermissionRef),
    /// The caller must own the target account or hold a role in the set.
    SelfOrRoles(RoleSet),
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticated => f.write_str("authenticated"),
            Self::Roles(roles) => write!(f, "roles:{roles}"),
            Self::Permission(permission) => write!(f, "permission:{permission}"),
            Self::SelfOrRoles(roles) => write!(f, "self_or_roles:{roles}"),
        }
    }
}

/// Per-request input to a guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardRequest<'a> {
    identity: Option<&'a IdentityContext>,
    target: Option<&'a str>,
    request_id: Option<RequestId>,
}

impl<'a> GuardRequest<'a> {
    /// A request from `identity`, or an anonymous one.
    #[must_use]
    pub const fn new(identity: Option<&'a IdentityContext>) -> Self {
        Self {
            identity,
            target: None,
            request_id: None,
        }
    }

    /// A request with no identity.
    #[must_use]
    pub const fn anonymous() -> Self {
        Self::new(None)
    }

    /// A request from an authenticated caller.
    #[must_use]
    pub const fn authenticated(identity: &'a IdentityContext) -> Self {
        Self::new(Some(identity))
    }

    /// Sets the username the operation acts on.
    #[must_use]
    pub const fn with_target(mut self, username: &'a str) -> Self {
        self.target = Some(username);
        self
    }

    /// Sets the request ID recorded in the audit entry.
    #[must_use]
    pub const fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// The caller, if any.
    #[must_use]
    pub const fn identity(&self) -> Option<&'a IdentityContext> {
        self.identity
    }

    /// The target username, if any.
    #[must_use]
    pub const fn target(&self) -> Option<&'a str> {
        self.target
    }
}

/// An ordered, immutable chain of checks.
///
/// Cloning is cheap; the checks are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    name: Arc<str>,
    checks: Arc<[Check]>,
}

impl Guard {
    /// Starts building a guard.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> GuardBuilder {
        GuardBuilder {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    /// Guard name, used in logs, metrics and audit entries.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The checks, in evaluation order.
    #[must_use]
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Human-readable description of the checks.
    #[must_use]
    pub fn capability(&self) -> String {
        if self.checks.is_empty() {
            return "none".to_string();
        }
        self.checks
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" + ")
    }

    /// Runs the checks and records one audit entry.
    pub fn evaluate(
        &self,
        request: &GuardRequest<'_>,
        matrix: &dyn MatrixSource,
        audit: &dyn AuditSink,
    ) -> Decision {
        let identity = request.identity;
        let mut snapshot: Option<Option<Arc<VersionedMatrix>>> = None;
        let mut decision = Decision::Allow;

        for check in self.checks.iter() {
            let step = match check {
                Check::Authenticated => policy::check_authenticated(identity),
                Check::Roles(allowed) => policy::check_role(identity, *allowed),
                Check::SelfOrRoles(allowed) => {
                    policy::check_self_or_roles(identity, request.target, *allowed)
                }
                Check::Permission(permission) => {
                    self.check_permission(identity, permission, matrix, &mut snapshot)
                }
            };
            if !step.is_allowed() {
                decision = step;
                break;
            }
        }

        let matrix_version = snapshot.flatten().map(|m| m.version());
        audit.record(&self.audit_entry(request, decision, matrix_version));
        decision
    }

    /// Records and returns a `CollaboratorUnavailable` deny without running
    /// any check.
    ///
    /// Used when the identity itself could not be resolved.
    pub fn deny_unavailable(&self, request: &GuardRequest<'_>, audit: &dyn AuditSink) -> Decision {
        let decision = Decision::Deny(DenyReason::CollaboratorUnavailable);
        audit.record(&self.audit_entry(request, decision, None));
        decision
    }

    fn check_permission(
        &self,
        identity: Option<&IdentityContext>,
        permission: &PermissionRef,
        source: &dyn MatrixSource,
        snapshot: &mut Option<Option<Arc<VersionedMatrix>>>,
    ) -> Decision {
        // Anonymous and admin callers are decided before the matrix step.
        if identity.map_or(true, IdentityContext::is_admin) {
            return policy::check_permission(identity, None, permission);
        }

        if snapshot.is_none() {
            match source.current() {
                Ok(current) => *snapshot = Some(current),
                Err(err) => {
                    warn!(guard = %self.name, error = %err, "permission matrix unavailable");
                    return Decision::Deny(DenyReason::CollaboratorUnavailable);
                }
            }
        }

        let matrix = snapshot
            .as_ref()
            .and_then(Option::as_deref)
            .map(VersionedMatrix::matrix);
        policy::check_permission(identity, matrix, permission)
    }

    fn audit_entry(
        &self,
        request: &GuardRequest<'_>,
        decision: Decision,
        matrix_version: Option<u64>,
    ) -> AuditEntry {
        AuditEntry {
            timestamp: Utc::now(),
            request_id: request.request_id,
            principal: request
                .identity
                .map_or_else(|| ANONYMOUS.to_string(), IdentityContext::log_id),
            role: request.identity.map(IdentityContext::role),
            guard: self.name.to_string(),
            capability: self.capability(),
            outcome: decision.outcome(),
            reason: decision.deny_reason(),
            matrix_version,
        }
    }
}

/// Builder for [`Guard`].
#[derive(Debug, Clone)]
pub struct GuardBuilder {
    name: String,
    checks: Vec<Check>,
}

impl GuardBuilder {
    /// Requires an identity.
    #[must_use]
    pub fn authenticated(mut self) -> Self {
        self.checks.push(Check::Authenticated);
        self
    }

    /// Requires one of `roles`.
    #[must_use]
    pub fn roles(mut self, roles: impl Into<RoleSet>) -> Self {
        self.checks.push(Check::Roles(roles.into()));
        self
    }

    /// Requires a permission, by enum or by name.
    #[must_use]
    pub fn permission(mut self, permission: impl Into<PermissionRef>) -> Self {
        self.checks.push(Check::Permission(permission.into()));
        self
    }

    /// Requires the caller to own the target account or hold one of `roles`.
    #[must_use]
    pub fn self_or_roles(mut self, roles: impl Into<RoleSet>) -> Self {
        self.checks.push(Check::SelfOrRoles(roles.into()));
        self
    }

    /// Appends an arbitrary check.
    #[must_use]
    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Freezes the chain.
    #[must_use]
    pub fn build(self) -> Guard {
        Guard {
            name: self.name.into(),
            checks: self.checks.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::matrix::{MatrixHandle, PermissionMatrix};
    use crate::permission::Permission;
    use atlas_core::{CollaboratorError, ProfileSnapshot, Role, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSource;

    impl MatrixSource for FailingSource {
        fn current(&self) -> Result<Option<Arc<VersionedMatrix>>, CollaboratorError> {
            Err(CollaboratorError::new("configuration store", "offline"))
        }
    }

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
        inner: MatrixHandle,
    }

    impl MatrixSource for CountingSource {
        fn current(&self) -> Result<Option<Arc<VersionedMatrix>>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.current()
        }
    }

    fn identity(role: Role) -> IdentityContext {
        IdentityContext::new(UserId::new("u-7").unwrap(), role, ProfileSnapshot::new("lena"))
    }

    #[test]
    fn test_builder_and_capability() {
        let guard = Guard::builder("config.permissions.replace")
            .authenticated()
            .permission(Permission::CanManageRoles)
            .build();
        assert_eq!(guard.name(), "config.permissions.replace");
        assert_eq!(guard.checks().len(), 2);
        assert_eq!(
            guard.capability(),
            "authenticated + permission:canManageRoles"
        );

        let roles = Guard::builder("r")
            .roles([Role::Manager, Role::Admin])
            .build();
        assert_eq!(roles.capability(), "roles:{manager, admin}");
    }

    #[test]
    fn test_empty_guard_allows() {
        let audit = MemoryAuditSink::new();
        let guard = Guard::builder("public").build();
        assert_eq!(
            guard.evaluate(&GuardRequest::anonymous(), &MatrixHandle::new(), &audit),
            Decision::Allow
        );
        assert_eq!(audit.last().unwrap().capability, "none");
    }

    #[test]
    fn test_first_deny_wins() {
        let audit = MemoryAuditSink::new();
        let guard = Guard::builder("admin.only")
            .authenticated()
            .roles(RoleSet::of(Role::Admin))
            .build();

        let decision = guard.evaluate(&GuardRequest::anonymous(), &MatrixHandle::new(), &audit);
        assert_eq!(decision, Decision::Deny(DenyReason::NotAuthenticated));

        let entry = audit.last().unwrap();
        assert_eq!(entry.principal, "anonymous");
        assert_eq!(entry.role, None);
        assert_eq!(entry.reason, Some(DenyReason::NotAuthenticated));
    }

    #[test]
    fn test_declared_order_is_kept() {
        let audit = MemoryAuditSink::new();
        let support = identity(Role::Support);
        // Role check first: the matrix step is never reached.
        let guard = Guard::builder("ordered")
            .roles(RoleSet::of(Role::Manager))
            .permission(Permission::CanViewDashboard)
            .build();
        let source = CountingSource::default();

        let decision = guard.evaluate(&GuardRequest::authenticated(&support), &source, &audit);
        assert_eq!(decision, Decision::Deny(DenyReason::InsufficientRole));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_matrix_fetched_once_per_evaluation() {
        let audit = MemoryAuditSink::new();
        let supervisor = identity(Role::Supervisor);
        let source = CountingSource::default();
        source.inner.replace(PermissionMatrix::default_matrix());
        let guard = Guard::builder("two.permissions")
            .authenticated()
            .permission(Permission::CanViewDashboard)
            .permission(Permission::CanImportUsers)
            .build();

        let decision = guard.evaluate(&GuardRequest::authenticated(&supervisor), &source, &audit);
        assert_eq!(decision, Decision::Allow);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(audit.last().unwrap().matrix_version, Some(1));
    }

    #[test]
    fn test_admin_skips_matrix() {
        let audit = MemoryAuditSink::new();
        let admin = identity(Role::Admin);
        let guard = Guard::builder("backups.restore")
            .authenticated()
            .permission(Permission::CanManageBackups)
            .build();

        let decision = guard.evaluate(&GuardRequest::authenticated(&admin), &FailingSource, &audit);
        assert_eq!(decision, Decision::Allow);
        assert_eq!(audit.last().unwrap().matrix_version, None);
    }

    #[test]
    fn test_source_failure_fails_closed() {
        let audit = MemoryAuditSink::new();
        let manager = identity(Role::Manager);
        let guard = Guard::builder("stats.volume")
            .authenticated()
            .permission(Permission::CanViewDashboard)
            .build();

        let decision =
            guard.evaluate(&GuardRequest::authenticated(&manager), &FailingSource, &audit);
        assert_eq!(decision, Decision::Deny(DenyReason::CollaboratorUnavailable));
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn test_self_or_roles_uses_target() {
        let audit = MemoryAuditSink::new();
        let client = identity(Role::Client);
        let guard = Guard::builder("users.update_password")
            .authenticated()
            .self_or_roles(Role::Admin)
            .build();
        let matrix = MatrixHandle::new();

        let own = GuardRequest::authenticated(&client).with_target("lena");
        let other = GuardRequest::authenticated(&client).with_target("omar");
        assert_eq!(guard.evaluate(&own, &matrix, &audit), Decision::Allow);
        assert_eq!(
            guard.evaluate(&other, &matrix, &audit),
            Decision::Deny(DenyReason::InsufficientRole)
        );
    }

    #[test]
    fn test_deny_unavailable_is_audited() {
        let audit = MemoryAuditSink::new();
        let guard = Guard::builder("kb.update").authenticated().build();
        let request_id = RequestId::new();

        let decision =
            guard.deny_unavailable(&GuardRequest::anonymous().with_request_id(request_id), &audit);

        assert_eq!(decision, Decision::Deny(DenyReason::CollaboratorUnavailable));
        assert_eq!(audit.last().unwrap().request_id, Some(request_id));
    }

    #[test]
    fn test_guard_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Guard>();
    }
}
