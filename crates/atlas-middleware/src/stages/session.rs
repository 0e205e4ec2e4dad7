//! Session resolution middleware.
//!
//! Reads the session token from the session cookie (`connect.sid` by
//! default) or, for non-browser clients, the `x-session-token` header, and
//! resolves it to an [`IdentityContext`](atlas_core::IdentityContext)
//! through the [`Authorizer`].
//!
//! | Outcome | Effect |
//! |---|---|
//! | no token, unknown or expired token | request continues anonymously |
//! | valid session | caller stored in the context |
//! | provider unavailable | [`SessionUnavailable`] stored; the guard denies |
//! | malformed session record | request aborted with 500 |

use std::sync::Arc;

use atlas_authz::{Authorizer, AuthzError, SessionToken};
use atlas_core::ErrorEnvelope;
use http::header::COOKIE;
use http::StatusCode;
use tracing::{debug, error, warn};

use crate::context::MiddlewareContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};

/// Default session cookie name.
pub const SESSION_COOKIE: &str = "connect.sid";

/// Default session header name.
pub const SESSION_HEADER: &str = "x-session-token";

/// Stored in the context when the identity provider could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUnavailable {
    /// Provider error, for logs only.
    pub message: String,
}

/// Middleware that resolves the caller's session.
#[derive(Debug, Clone)]
pub struct SessionMiddleware {
    authorizer: Arc<Authorizer>,
    cookie_name: String,
    header_name: String,
}

impl SessionMiddleware {
    /// Creates a session stage using the default cookie and header names.
    #[must_use]
    pub fn new(authorizer: Arc<Authorizer>) -> Self {
        Self {
            authorizer,
            cookie_name: SESSION_COOKIE.to_string(),
            header_name: SESSION_HEADER.to_string(),
        }
    }

    /// Sets the session cookie name.
    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Sets the session header name.
    #[must_use]
    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into().to_ascii_lowercase();
        self
    }

    /// Extracts the session token, preferring the cookie.
    pub fn extract_token(&self, request: &Request) -> Option<SessionToken> {
        self.token_from_cookie(request)
            .or_else(|| self.token_from_header(request))
            .map(SessionToken::new)
    }

    fn token_from_cookie(&self, request: &Request) -> Option<String> {
        request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim_matches('"').to_string())
            .filter(|value| !value.is_empty())
    }

    fn token_from_header(&self, request: &Request) -> Option<String> {
        request
            .headers()
            .get(self.header_name.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

impl Middleware for SessionMiddleware {
    fn name(&self) -> &'static str {
        "session"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut MiddlewareContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let token = self.extract_token(&request);

            match self.authorizer.resolve_identity(token.as_ref()).await {
                Ok(Some(identity)) => {
                    debug!(
                        user_id = %identity.log_id(),
                        role = identity.role().as_str(),
                        "session resolved"
                    );
                    ctx.set_identity(identity);
                }
                Ok(None) => debug!(has_token = token.is_some(), "anonymous request"),
                Err(AuthzError::Collaborator(err)) => {
                    warn!(error = %err, "session provider unavailable");
                    ctx.set_extension(SessionUnavailable {
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    error!(error = %err, "malformed session, aborting request");
                    let envelope = ErrorEnvelope::new("Internal server error")
                        .with_request_id(ctx.request_id().to_string());
                    return Response::json_error(StatusCode::INTERNAL_SERVER_ERROR, &envelope);
                }
            }

            if let Some(token) = token {
                ctx.set_extension(token);
            }
            next.run(ctx, request).await
        })
    }
}
