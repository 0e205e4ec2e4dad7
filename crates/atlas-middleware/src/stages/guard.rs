//! Guard middleware.
//!
//! Runs one static [`Guard`] for the operation behind the route. On allow
//! the request continues to the handler; on deny the pipeline stops and the
//! caller gets the admin API error envelope with the status the deny reason
//! maps to:
//!
//! | Reason | Status | Message |
//! |---|---|---|
//! | `not_authenticated` | 401 | Authentication required |
//! | `insufficient_role`, `insufficient_permission` | 403 | Insufficient permissions |
//! | `permission_matrix_missing` | 500 | Permissions not configured |
//! | `collaborator_unavailable` | 500 | Permission check failed |
//!
//! Either way an [`AuthorizationResult`] is left in the context.

use std::sync::Arc;

use atlas_authz::{Authorizer, Decision, Guard, GuardRequest};
use atlas_core::ErrorEnvelope;

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::stages::session::SessionUnavailable;
use crate::types::{Request, Response, ResponseExt};

/// Extracts the username an operation acts on, for self-or-role checks.
pub type TargetExtractor = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// The guard's verdict, stored in the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    /// Name of the guard that ran.
    pub guard: String,
    /// Its decision.
    pub decision: Decision,
}

/// Middleware that enforces one guard.
#[derive(Clone)]
pub struct GuardMiddleware {
    authorizer: Arc<Authorizer>,
    guard: Guard,
    target: Option<TargetExtractor>,
}

impl std::fmt::Debug for GuardMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardMiddleware")
            .field("guard", &self.guard.name())
            .field("has_target", &self.target.is_some())
            .finish_non_exhaustive()
    }
}

impl GuardMiddleware {
    /// Creates a stage enforcing `guard`.
    #[must_use]
    pub fn new(authorizer: Arc<Authorizer>, guard: Guard) -> Self {
        Self {
            authorizer,
            guard,
            target: None,
        }
    }

    /// Sets how the target username is read from the request.
    #[must_use]
    pub fn with_target<F>(mut self, extract: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        self.target = Some(Arc::new(extract));
        self
    }

    /// The enforced guard.
    #[must_use]
    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    fn decide(&self, ctx: &MiddlewareContext, request: &Request) -> Decision {
        let target = self.target.as_ref().and_then(|extract| extract(request));
        let mut guard_request =
            GuardRequest::new(ctx.identity()).with_request_id(ctx.request_id());
        if let Some(target) = target.as_deref() {
            guard_request = guard_request.with_target(target);
        }

        if ctx.has_extension::<SessionUnavailable>() {
            return self
                .guard
                .deny_unavailable(&guard_request, self.authorizer.audit_sink().as_ref());
        }
        self.authorizer.evaluate(&self.guard, &guard_request)
    }
}

impl Middleware for GuardMiddleware {
    fn name(&self) -> &'static str {
        "guard"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let decision = self.decide(ctx, &request);
            ctx.set_extension(AuthorizationResult {
                guard: self.guard.name().to_string(),
                decision,
            });

            match decision {
                Decision::Allow => next.run(ctx, request).await,
                Decision::Deny(reason) => {
                    let envelope = ErrorEnvelope::new(reason.public_message())
                        .with_request_id(ctx.request_id().to_string());
                    Response::json_error(reason.status_code(), &envelope)
                }
            }
        })
    }
}

/// Reads the path segment `skip_suffix` places before the last one.
///
/// With `skip_suffix` 0 this is the last segment; with 1 it yields `mina`
/// from `/api/users/mina/update-password`.
pub fn path_segment_from_end(
    skip_suffix: usize,
) -> impl Fn(&Request) -> Option<String> + Send + Sync {
    move |request: &Request| {
        request
            .uri()
            .path()
            .trim_end_matches('/')
            .rsplit('/')
            .nth(skip_suffix)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_authz::{
        AuthzConfig, DenyReason, InMemoryMatrixStore, InMemorySessionStore, MemoryAuditSink,
        Permission, PermissionMatrix,
    };
    use atlas_core::{IdentityContext, ProfileSnapshot, Role, RoleSet, UserId};
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::{BodyExt, Full};

    fn authorizer(matrix: Option<PermissionMatrix>) -> (Arc<Authorizer>, MemoryAuditSink) {
        let audit = MemoryAuditSink::new();
        let authorizer = Authorizer::new(
            AuthzConfig::default(),
            Arc::new(InMemoryMatrixStore::new()),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(audit.clone()),
        );
        if let Some(matrix) = matrix {
            authorizer.matrix().replace(matrix);
        }
        (Arc::new(authorizer), audit)
    }

    fn caller(role: Role, username: &str) -> IdentityContext {
        IdentityContext::new(
            UserId::new(format!("id-{username}")).unwrap(),
            role,
            ProfileSnapshot::new(username),
        )
    }

    fn request(path: &str) -> Request {
        http::Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn ok(_ctx: &mut MiddlewareContext, _req: Request) -> BoxFuture<'static, Response> {
        Box::pin(async { http::Response::new(Full::new(Bytes::from("handled"))) })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn users_list(authorizer: Arc<Authorizer>) -> GuardMiddleware {
        GuardMiddleware::new(
            authorizer,
            Guard::builder("users.list")
                .authenticated()
                .permission(Permission::CanManageUsers)
                .build(),
        )
    }

    #[tokio::test]
    async fn test_anonymous_gets_401_envelope() {
        let (authorizer, audit) = authorizer(Some(PermissionMatrix::default_matrix()));
        let stage = users_list(authorizer);
        let mut ctx = MiddlewareContext::new();

        let response = stage.process(&mut ctx, request("/api/users"), Next::handler(ok)).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Authentication required");
        assert_eq!(body["requestId"], ctx.request_id().to_string());
        assert_eq!(audit.last().unwrap().request_id, Some(ctx.request_id()));
        assert_eq!(
            ctx.get_extension::<AuthorizationResult>().unwrap().decision,
            Decision::Deny(DenyReason::NotAuthenticated)
        );
    }

    #[tokio::test]
    async fn test_insufficient_permission_gets_403() {
        let (authorizer, _) = authorizer(Some(PermissionMatrix::default_matrix()));
        let stage = users_list(authorizer);
        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(caller(Role::Client, "ana"));

        let response = stage.process(&mut ctx, request("/api/users"), Next::handler(ok)).await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["message"], "Insufficient permissions");
    }

    #[tokio::test]
    async fn test_allow_reaches_handler() {
        let (authorizer, _) = authorizer(Some(PermissionMatrix::default_matrix()));
        let stage = users_list(authorizer);
        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(caller(Role::Admin, "root"));

        let response = stage.process(&mut ctx, request("/api/users"), Next::handler(ok)).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(ctx.get_extension::<AuthorizationResult>().unwrap().decision.is_allowed());
    }

    #[tokio::test]
    async fn test_missing_matrix_gets_500() {
        let (authorizer, _) = authorizer(None);
        let stage = users_list(authorizer);
        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(caller(Role::Manager, "ines"));

        let response = stage.process(&mut ctx, request("/api/users"), Next::handler(ok)).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["message"], "Permissions not configured");
    }

    #[tokio::test]
    async fn test_unavailable_session_fails_closed() {
        let (authorizer, audit) = authorizer(Some(PermissionMatrix::default_matrix()));
        let stage = users_list(authorizer);
        let mut ctx = MiddlewareContext::new();
        ctx.set_extension(SessionUnavailable {
            message: "connection reset".into(),
        });

        let response = stage.process(&mut ctx, request("/api/users"), Next::handler(ok)).await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["message"], "Permission check failed");
        assert_eq!(audit.last().unwrap().reason, Some(DenyReason::CollaboratorUnavailable));
    }

    #[tokio::test]
    async fn test_self_or_admin_uses_target() {
        let (authorizer, _) = authorizer(Some(PermissionMatrix::default_matrix()));
        let stage = GuardMiddleware::new(
            authorizer,
            Guard::builder("users.update_password")
                .authenticated()
                .self_or_roles(RoleSet::of(Role::Admin))
                .build(),
        )
        .with_target(path_segment_from_end(1));

        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(caller(Role::Client, "ana"));
        let own = stage
            .process(&mut ctx, request("/api/users/ana/password"), Next::handler(ok))
            .await;
        assert_eq!(own.status(), StatusCode::OK);

        let mut ctx = MiddlewareContext::new();
        ctx.set_identity(caller(Role::Client, "ana"));
        let other = stage
            .process(&mut ctx, request("/api/users/ben/password"), Next::handler(ok))
            .await;
        assert_eq!(other.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_path_segment_from_end() {
        let extract = path_segment_from_end(1);
        assert_eq!(extract(&request("/api/users/mina/password")), Some("mina".into()));
        assert_eq!(extract(&request("/api/users/mina/password/")), Some("mina".into()));
        assert_eq!(path_segment_from_end(0)(&request("/api/users/mina")), Some("mina".into()));
        assert_eq!(path_segment_from_end(5)(&request("/a")), None);
    }
}
