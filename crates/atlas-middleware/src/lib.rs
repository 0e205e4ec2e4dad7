//! # Atlas Middleware
//!
//! HTTP pipeline stages that put the authorization core in front of the
//! admin API.
//!
//! ```text
//! Request → RequestId → Tracing → Session → Guard → Handler
//! ```
//!
//! | Stage | Middleware | Purpose |
//! |-------|------------|---------|
//! | 1 | [`RequestIdMiddleware`] | Generate/propagate request ID (UUID v7) |
//! | 2 | [`TracingMiddleware`] | Request span and completion log |
//! | 3 | [`SessionMiddleware`] | Resolve the session cookie to an identity |
//! | 4 | [`GuardMiddleware`] | Evaluate the operation's guard, deny with the error envelope |
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use atlas_authz::{
//!     Authorizer, AuthzConfig, Guard, InMemoryMatrixStore, InMemorySessionStore,
//!     MemoryAuditSink, Permission,
//! };
//! use atlas_middleware::{
//!     GuardMiddleware, Pipeline, RequestIdMiddleware, SessionMiddleware, TracingMiddleware,
//! };
//!
//! let authorizer = Arc::new(Authorizer::new(
//!     AuthzConfig::default(),
//!     Arc::new(InMemoryMatrixStore::new()),
//!     Arc::new(InMemorySessionStore::new()),
//!     Arc::new(MemoryAuditSink::new()),
//! ));
//!
//! let guard = Guard::builder("backups.list")
//!     .authenticated()
//!     .permission(Permission::CanManageBackups)
//!     .build();
//!
//! let pipeline = Pipeline::builder()
//!     .stage(RequestIdMiddleware::new())
//!     .stage(TracingMiddleware::default())
//!     .stage(SessionMiddleware::new(authorizer.clone()))
//!     .stage(GuardMiddleware::new(authorizer, guard))
//!     .build();
//!
//! assert_eq!(pipeline.stage_names(), ["request_id", "tracing", "session", "guard"]);
//! ```

#![doc(html_root_url = "https://docs.rs/atlas-middleware/0.1.0")]

pub mod context;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use context::MiddlewareContext;
pub use middleware::{BoxFuture, Handler, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
pub use stages::{
    AuthorizationResult, GuardMiddleware, RequestIdMiddleware, SessionMiddleware,
    SessionUnavailable, TracingMiddleware,
};
pub use types::{Request, Response, ResponseExt};
