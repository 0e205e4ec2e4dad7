//! Atlas Authorization - role and permission-matrix guards
//!
//! This crate decides, for every request to the admin backend, whether the
//! caller may proceed.
//!
//! # Overview
//!
//! - [`policy`] - pure checks: authenticated, role membership, matrix permission
//! - [`Guard`] - an ordered chain of checks that stops at the first deny
//! - [`PermissionMatrix`] / [`MatrixHandle`] - the live, versioned, copy-on-write matrix
//! - [`MatrixStore`] - durable storage for the matrix
//! - [`IdentityProvider`] - resolves session tokens to cached identities
//! - [`AuditSink`] - receives one record per decision
//! - [`Authorizer`] - wires the above together
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────────────────┐
//!                      │   MatrixStore              │
//!                      │   (file / in-memory)       │
//!                      └──────────┬─────────────────┘
//!                                 │ load / replace
//!                      ┌──────────▼─────────────────┐
//!                      │   MatrixHandle             │
//!                      │   (Arc swap, versioned)    │
//!                      └──────────┬─────────────────┘
//!                                 │ snapshot (lazy)
//!      SessionToken    ┌──────────▼─────────────────┐
//!          │           │   Guard                    │──► AuditSink
//!          ▼           │   (ordered checks)         │
//!   IdentityProvider ─►└──────────┬─────────────────┘
//!                                 │
//!                      Decision (Allow / Deny(reason))
//! ```
//!
//! # Example
//!
//! ```ignore
//! use atlas_authz::{Authorizer, AuthzConfig, Guard, Permission};
//!
//! let authorizer = Authorizer::new(AuthzConfig::default(), store, sessions, audit);
//! authorizer.start().await?;
//!
//! let guard = Guard::builder("users.list")
//!     .authenticated()
//!     .permission(Permission::CanManageUsers)
//!     .build();
//!
//! let result = authorizer.authorize(Some(&token), &guard).await?;
//! if let Some(reason) = result.decision.deny_reason() {
//!     return respond(reason.status_code(), reason.public_message());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod error;
pub mod guard;
pub mod matrix;
pub mod permission;
pub mod policy;
pub mod session;
pub mod store;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use atlas_core::IdentityContext;
use atlas_telemetry::metrics;
use tracing::{debug, error, info, instrument, warn};

// Re-exports for convenience
pub use audit::{
    AuditEntry, AuditLogWriter, AuditSink, ChannelAuditSink, FanoutAuditSink, MemoryAuditSink,
    MetricsAuditSink, TracingAuditSink,
};
pub use config::AuthzConfig;
pub use error::{AuthzError, AuthzResult};
pub use guard::{Check, Guard, GuardBuilder, GuardRequest};
pub use matrix::{MatrixHandle, MatrixSource, MatrixWarning, PermissionMatrix, VersionedMatrix};
pub use permission::{Permission, PermissionRef, UnknownPermission};
pub use policy::{Decision, DenyReason};
pub use session::{IdentityProvider, InMemorySessionStore, LoginMethod, SessionToken};
pub use store::{FileMatrixStore, InMemoryMatrixStore, MatrixStore};

/// A boxed, sendable future, as returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The resolved caller together with the guard's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    /// The caller, if a valid session was presented.
    pub identity: Option<IdentityContext>,
    /// The guard's decision.
    pub decision: Decision,
}

impl Authorization {
    /// Returns `true` if the guard allowed the request.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

/// Main authorization service for Atlas.
///
/// Owns the live matrix and the collaborators it is loaded from, and
/// evaluates guards against them.
pub struct Authorizer {
    config: AuthzConfig,
    matrix: MatrixHandle,
    store: Arc<dyn MatrixStore>,
    identities: Arc<dyn IdentityProvider>,
    audit: Arc<dyn AuditSink>,
    read_guard: Guard,
    replace_guard: Guard,
    // Held across every store access that ends in a publish, so the live
    // matrix is always the one most recently written to or read from the store.
    writes: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorizer")
            .field("config", &self.config)
            .field("matrix_version", &self.matrix.version())
            .finish_non_exhaustive()
    }
}

impl Authorizer {
    /// Create an Authorizer. No matrix is live until [`start`](Self::start).
    pub fn new(
        config: AuthzConfig,
        store: Arc<dyn MatrixStore>,
        identities: Arc<dyn IdentityProvider>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let read_guard = Guard::builder(config.read_guard_name.clone())
            .authenticated()
            .build();
        let replace_guard = Guard::builder(config.replace_guard_name.clone())
            .authenticated()
            .permission(Permission::CanManageRoles)
            .build();
        Self {
            config,
            matrix: MatrixHandle::new(),
            store,
            identities,
            audit,
            read_guard,
            replace_guard,
            writes: tokio::sync::Mutex::new(()),
        }
    }

    /// The live matrix cell.
    #[must_use]
    pub fn matrix(&self) -> &MatrixHandle {
        &self.matrix
    }

    /// The current matrix snapshot.
    #[must_use]
    pub fn current_matrix(&self) -> Option<Arc<VersionedMatrix>> {
        self.matrix.snapshot()
    }

    /// The configured audit sink.
    #[must_use]
    pub fn audit_sink(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    /// Loads the stored matrix and makes it live.
    ///
    /// With `materialize_default_matrix` set, a missing matrix is created
    /// from [`PermissionMatrix::default_matrix`] and stored. Otherwise a
    /// missing matrix leaves permission checks failing closed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Collaborator`] if the store fails.
    #[instrument(skip(self))]
    pub async fn start(&self) -> AuthzResult<Option<Arc<VersionedMatrix>>> {
        let _writes = self.writes.lock().await;
        let loaded = self.load_stored().await?;

        match loaded {
            Some(matrix) => Ok(Some(self.publish(matrix))),
            None => {
                error!("no permission matrix stored; permission checks will fail closed");
                Ok(None)
            }
        }
    }

    /// Resolves a session token to an identity.
    ///
    /// A missing or unknown token is anonymous, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Collaborator`] if the provider fails and
    /// [`AuthzError::MalformedIdentity`] if the stored session is invalid.
    pub async fn resolve_identity(
        &self,
        token: Option<&SessionToken>,
    ) -> AuthzResult<Option<IdentityContext>> {
        let Some(token) = token else {
            return Ok(None);
        };
        match self.identities.resolve(token).await? {
            Some(record) => Ok(record.into_identity()?),
            None => Ok(None),
        }
    }

    /// Evaluates `guard` against the live matrix.
    pub fn evaluate(&self, guard: &Guard, request: &GuardRequest<'_>) -> Decision {
        guard.evaluate(request, &self.matrix, self.audit.as_ref())
    }

    /// Resolves the caller and evaluates `guard`.
    ///
    /// A provider failure becomes a `CollaboratorUnavailable` deny.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::MalformedIdentity`] if the stored session is
    /// invalid; the request must be aborted.
    #[instrument(skip(self, token, guard), fields(guard = %guard.name()))]
    pub async fn authorize(
        &self,
        token: Option<&SessionToken>,
        guard: &Guard,
    ) -> AuthzResult<Authorization> {
        match self.resolve_identity(token).await {
            Ok(identity) => {
                let decision = self.evaluate(guard, &GuardRequest::new(identity.as_ref()));
                Ok(Authorization { identity, decision })
            }
            Err(AuthzError::Collaborator(err)) => {
                warn!(error = %err, "identity provider unavailable");
                let decision =
                    guard.deny_unavailable(&GuardRequest::anonymous(), self.audit.as_ref());
                Ok(Authorization {
                    identity: None,
                    decision,
                })
            }
            Err(err) => {
                error!(error = %err, "aborting request with malformed session");
                Err(err)
            }
        }
    }

    /// Returns the live matrix to an authenticated caller.
    ///
    /// If no matrix is live yet, the stored one is loaded and published
    /// first. The default is materialized only when
    /// `materialize_default_matrix` is set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::AccessDenied`] for anonymous callers or when no
    /// matrix exists and none may be materialized, and
    /// [`AuthzError::Collaborator`] if the store fails.
    pub async fn read_matrix(
        &self,
        identity: Option<&IdentityContext>,
    ) -> AuthzResult<Arc<VersionedMatrix>> {
        if let Decision::Deny(reason) =
            self.evaluate(&self.read_guard, &GuardRequest::new(identity))
        {
            return Err(AuthzError::AccessDenied(reason));
        }
        if let Some(current) = self.matrix.snapshot() {
            return Ok(current);
        }

        let _writes = self.writes.lock().await;
        // Another caller may have published while we waited.
        if let Some(current) = self.matrix.snapshot() {
            return Ok(current);
        }
        let loaded = self.load_stored().await?;
        match loaded {
            Some(matrix) => Ok(self.publish(matrix)),
            None => Err(AuthzError::AccessDenied(
                DenyReason::PermissionMatrixMissing,
            )),
        }
    }

    /// Replaces the matrix as a whole.
    ///
    /// The caller must hold `canManageRoles`. The new matrix is written to
    /// the store first and only published once the store accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::AccessDenied`] if the caller may not replace the
    /// matrix and [`AuthzError::Collaborator`] if the store fails; in both
    /// cases the live matrix is unchanged.
    #[instrument(skip(self, identity, matrix))]
    pub async fn replace_matrix(
        &self,
        identity: Option<&IdentityContext>,
        matrix: PermissionMatrix,
    ) -> AuthzResult<Arc<VersionedMatrix>> {
        if let Decision::Deny(reason) =
            self.evaluate(&self.replace_guard, &GuardRequest::new(identity))
        {
            return Err(AuthzError::AccessDenied(reason));
        }

        let _writes = self.writes.lock().await;
        self.store.replace(matrix.clone()).await?;
        let published = self.publish(matrix);
        info!(
            version = published.version(),
            user_id = %identity.map(IdentityContext::log_id).unwrap_or_default(),
            "permission matrix replaced"
        );
        Ok(published)
    }

    /// Re-reads the store and publishes the result if it changed.
    ///
    /// Returns the newly published snapshot, or `None` if nothing changed. A
    /// matrix missing from the store leaves the live matrix in place.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::Collaborator`] if the store fails; the live
    /// matrix is unchanged.
    #[instrument(skip(self))]
    pub async fn reload_matrix(&self) -> AuthzResult<Option<Arc<VersionedMatrix>>> {
        let _writes = self.writes.lock().await;
        let loaded = match self.store.load().await {
            Ok(loaded) => loaded,
            Err(err) => {
                metrics::record_matrix_reload_failed();
                warn!(error = %err, "permission matrix reload failed, keeping current matrix");
                return Err(err.into());
            }
        };

        let Some(matrix) = loaded else {
            warn!("permission matrix missing from store, keeping current matrix");
            return Ok(None);
        };

        if self
            .matrix
            .snapshot()
            .is_some_and(|current| current.matrix() == &matrix)
        {
            debug!("permission matrix unchanged");
            return Ok(None);
        }
        Ok(Some(self.publish(matrix)))
    }

    async fn load_stored(&self) -> AuthzResult<Option<PermissionMatrix>> {
        if self.config.materialize_default_matrix {
            let matrix = self
                .store
                .load_or_init(PermissionMatrix::default_matrix())
                .await?;
            return Ok(Some(matrix));
        }
        Ok(self.store.load().await?)
    }

    fn publish(&self, matrix: PermissionMatrix) -> Arc<VersionedMatrix> {
        let published = self.matrix.replace(matrix);
        metrics::record_matrix_swap(published.version());
        info!(version = published.version(), "permission matrix published");
        published
    }
}
