//! The policy engine.
//!
//! Pure functions from (identity, requirement, matrix) to a [`Decision`].
//! Nothing here holds state or takes a lock, so any number of requests may
//! evaluate concurrently.
//!
//! Denial is a value. A check never returns `Err` for an expected outcome.

use std::fmt;

use atlas_core::{ErrorCategory, IdentityContext, RoleSet};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::matrix::PermissionMatrix;
use crate::permission::PermissionRef;

/// Why a check denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// No identity was resolved for the request.
    NotAuthenticated,
    /// The caller's role is not in the allowed set.
    InsufficientRole,
    /// The matrix does not grant the permission to the caller's role.
    InsufficientPermission,
    /// No permission matrix is configured.
    PermissionMatrixMissing,
    /// The session provider or configuration store failed.
    CollaboratorUnavailable,
}

impl DenyReason {
    /// Stable snake_case name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::InsufficientRole => "insufficient_role",
            Self::InsufficientPermission => "insufficient_permission",
            Self::PermissionMatrixMissing => "permission_matrix_missing",
            Self::CollaboratorUnavailable => "collaborator_unavailable",
        }
    }

    /// Error category of the deny.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotAuthenticated => ErrorCategory::Authentication,
            Self::InsufficientRole | Self::InsufficientPermission => ErrorCategory::Authorization,
            Self::PermissionMatrixMissing => ErrorCategory::Configuration,
            Self::CollaboratorUnavailable => ErrorCategory::Unavailable,
        }
    }

    /// HTTP status a handler must respond with.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category().default_status_code()
    }

    /// Message safe to show the caller.
    ///
    /// Never names the permission or role that was missing.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "Authentication required",
            Self::InsufficientRole | Self::InsufficientPermission => "Insufficient permissions",
            Self::PermissionMatrixMissing => "Permissions not configured",
            Self::CollaboratorUnavailable => "Permission check failed",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a check or guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    /// The request may proceed.
    Allow,
    /// The request must stop.
    Deny(DenyReason),
}

impl Decision {
    /// Returns `true` for [`Decision::Allow`].
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Returns the deny reason, if denied.
    #[must_use]
    pub const fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Allow => None,
            Self::Deny(reason) => Some(*reason),
        }
    }

    /// `"allow"` or `"deny"`.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny(_) => "deny",
        }
    }
}

/// Denies anonymous callers.
#[must_use]
pub fn check_authenticated(identity: Option<&IdentityContext>) -> Decision {
    match identity {
        Some(_) => Decision::Allow,
        None => Decision::Deny(DenyReason::NotAuthenticated),
    }
}

/// Allows callers whose role is in `allowed`. Exact match, no hierarchy.
#[must_use]
pub fn check_role(identity: Option<&IdentityContext>, allowed: RoleSet) -> Decision {
    let Some(identity) = identity else {
        return Decision::Deny(DenyReason::NotAuthenticated);
    };
    if allowed.contains(identity.role()) {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::InsufficientRole)
    }
}

/// Looks up `permission` for the caller's role.
///
/// Order matters: anonymous callers are rejected first, then admins are
/// allowed before the matrix is consulted, so an admin is allowed even with
/// no matrix configured. Everyone else fails closed on a missing matrix.
#[must_use]
pub fn check_permission(
    identity: Option<&IdentityContext>,
    matrix: Option<&PermissionMatrix>,
    permission: &PermissionRef,
) -> Decision {
    let Some(identity) = identity else {
        return Decision::Deny(DenyReason::NotAuthenticated);
    };
    if identity.is_admin() {
        return Decision::Allow;
    }
    let Some(matrix) = matrix else {
        return Decision::Deny(DenyReason::PermissionMatrixMissing);
    };
    if matrix.lookup(identity.role(), permission) {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::InsufficientPermission)
    }
}

/// Allows callers acting on their own account, otherwise requires a role.
///
/// `target` is the username the operation acts on. With an empty `allowed`
/// set only the account owner passes.
#[must_use]
pub fn check_self_or_roles(
    identity: Option<&IdentityContext>,
    target: Option<&str>,
    allowed: RoleSet,
) -> Decision {
    let Some(identity) = identity else {
        return Decision::Deny(DenyReason::NotAuthenticated);
    };
    if target.is_some_and(|username| identity.is_self(username)) {
        return Decision::Allow;
    }
    check_role(Some(identity), allowed)
}
