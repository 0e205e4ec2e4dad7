//! # Atlas
//!
//! **Role and permission-matrix authorization for the Atlas admin backend**
//!
//! Atlas decides, for every admin API request, whether the caller may
//! proceed:
//!
//! - **Identity** - the caller's session resolves to an id, a role, and a
//!   profile snapshot cached at login
//! - **Permission matrix** - a versioned role x permission table, editable at
//!   runtime and hot-reloaded from disk
//! - **Guards** - one static chain of checks per admin operation
//! - **Audit** - one record per decision, to logs, metrics, and a JSON-lines file
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use atlas::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), AtlasError> {
//!     let config = ConfigLoader::new()
//!         .with_production()
//!         .with_optional_file("config/atlas.toml")?
//!         .with_dotenv()
//!         .load()?;
//!     atlas::init_telemetry(&config)?;
//!
//!     let mut service = AdminAuthService::from_config(&config)?;
//!     service.start().await?;
//!
//!     // For each incoming admin API request:
//!     let response = service.handle(request, handler).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Request → RequestId → Tracing → Session → Guard → Handler
//!                                    │         │
//!                          IdentityProvider  Authorizer ──► AuditSink
//!                                              │
//!                                         MatrixHandle ◄── MatrixStore ◄── FileWatcher
//! ```

#![doc(html_root_url = "https://docs.rs/atlas/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod operations;
pub mod service;

pub use atlas_authz as authz;
pub use atlas_config as config;
pub use atlas_core as core;
pub use atlas_middleware as middleware;
pub use atlas_telemetry as telemetry;

pub use error::{AtlasError, AtlasResult};
pub use operations::{Access, AdminOperation, GuardCatalog};
pub use service::AdminAuthService;

/// Installs logging and metrics as configured.
///
/// # Errors
///
/// Returns [`AtlasError::Telemetry`] if a subscriber or recorder is already
/// installed or the metrics address does not parse.
pub fn init_telemetry(config: &atlas_config::AtlasConfig) -> AtlasResult<()> {
    atlas_telemetry::init_telemetry(&config.telemetry_config())?;
    Ok(())
}

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use atlas::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{AdminAuthService, AdminOperation, AtlasError, AtlasResult, GuardCatalog};

    pub use atlas_authz::{
        AuditEntry, AuditSink, Authorizer, Decision, DenyReason, Guard, GuardRequest,
        IdentityProvider, InMemorySessionStore, LoginMethod, MatrixStore, Permission,
        PermissionMatrix, SessionToken,
    };

    pub use atlas_config::{AtlasConfig, ConfigLoader};

    pub use atlas_core::{
        ErrorEnvelope, IdentityContext, ProfileSnapshot, RequestId, Role, RoleSet, UserId,
    };

    pub use atlas_middleware::{MiddlewareContext, Request, Response};
}
