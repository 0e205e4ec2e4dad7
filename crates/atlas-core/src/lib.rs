//! # Atlas Core
//!
//! Core types shared by every crate of the Atlas admin backend.
//!
//! This crate provides the foundational types the authorization layer is
//! built on:
//!
//! - [`IdentityContext`] - The resolved caller of a request (user id, role, profile snapshot)
//! - [`Role`] / [`RoleSet`] - The fixed role enumeration and cheap role sets
//! - [`SessionRecord`] - Raw cached session data as the session provider stores it
//! - [`RequestId`] - UUID v7 request identifier used for audit correlation
//! - [`ErrorCategory`] / [`ErrorEnvelope`] - Error classification and the JSON error body
//! - [`IdentityError`] / [`CollaboratorError`] - Errors shared across crates

#![doc(html_root_url = "https://docs.rs/atlas-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
mod error;
pub mod identity;

pub use context::RequestId;
pub use error::{CollaboratorError, ErrorCategory, ErrorEnvelope, IdentityError};
pub use identity::{
    IdentityContext, ProfileSnapshot, RefreshOutcome, Role, RoleSet, SessionRecord, SessionUser,
    UserId,
};
