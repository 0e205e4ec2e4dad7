//! Middleware stages.
//!
//! In pipeline order:
//!
//! 1. [`request_id`] - generate or propagate the request ID
//! 2. [`tracing`] - open the request span
//! 3. [`session`] - resolve the caller's session
//! 4. [`guard`] - enforce the operation's guard

pub mod guard;
pub mod request_id;
pub mod session;
pub mod tracing;

pub use guard::{path_segment_from_end, AuthorizationResult, GuardMiddleware, TargetExtractor};
pub use request_id::RequestIdMiddleware;
pub use session::{SessionMiddleware, SessionUnavailable};
pub use tracing::TracingMiddleware;
