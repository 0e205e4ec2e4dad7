//! Caller identity.
//!
//! An [`IdentityContext`] is the resolved caller of a request: an
//! authenticated user id, one of the five fixed [`Role`]s, and a
//! [`ProfileSnapshot`] cached when the session was created.
//!
//! The type makes the half-filled state unrepresentable: a resolved identity
//! always has both a user id and a role. Raw session data arrives as a
//! [`SessionRecord`], whose fields are all optional; converting it with
//! [`SessionRecord::into_identity`] either yields an identity, yields
//! `None` (anonymous), or fails with an [`IdentityError`].
//!
//! # Example
//!
//! ```
//! use atlas_core::{IdentityContext, ProfileSnapshot, Role, UserId};
//!
//! let identity = IdentityContext::new(
//!     UserId::new("64f1c2").unwrap(),
//!     Role::Manager,
//!     ProfileSnapshot::new("mina"),
//! );
//! assert_eq!(identity.log_id(), "user:64f1c2");
//! assert!(!identity.is_admin());
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// The fixed role enumeration.
///
/// Role checks are exact-match: a `Manager` is not implicitly a `Supervisor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user of the assistant.
    Client,
    /// Support staff.
    Support,
    /// Support supervisor.
    Supervisor,
    /// Manager.
    Manager,
    /// Administrator. Granted every permission by code.
    Admin,
}

impl Role {
    /// Every role, in ascending order.
    pub const ALL: [Role; 5] = [
        Role::Client,
        Role::Support,
        Role::Supervisor,
        Role::Manager,
        Role::Admin,
    ];

    /// Returns the wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Support => "support",
            Self::Supervisor => "supervisor",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    /// Returns `true` for [`Role::Admin`].
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "support" => Ok(Self::Support),
            "supervisor" => Ok(Self::Supervisor),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            other => Err(IdentityError::UnknownRole(other.to_string())),
        }
    }
}

/// A set of roles, stored as a bitmask.
///
/// Guards hold role sets for the lifetime of the process, so the set is
/// `Copy` and lookups are a single mask test.
///
/// ```
/// use atlas_core::{Role, RoleSet};
///
/// let staff = RoleSet::from([Role::Support, Role::Supervisor]);
/// assert!(staff.contains(Role::Support));
/// assert!(!staff.contains(Role::Manager));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RoleSet {
    bits: u8,
}

impl RoleSet {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// The set of every role.
    #[must_use]
    pub const fn all() -> Self {
        Self { bits: 0b1_1111 }
    }

    /// A set containing a single role.
    #[must_use]
    pub const fn of(role: Role) -> Self {
        Self { bits: role.bit() }
    }

    /// Returns a copy of the set with `role` added.
    #[must_use]
    pub const fn with(self, role: Role) -> Self {
        Self {
            bits: self.bits | role.bit(),
        }
    }

    /// Returns `true` if `role` is a member.
    #[must_use]
    pub const fn contains(&self, role: Role) -> bool {
        self.bits & role.bit() != 0
    }

    /// Returns `true` if the set has no members.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Number of roles in the set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Iterates over the members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        Role::ALL.into_iter().filter(|r| self.contains(*r))
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl<const N: usize> From<[Role; N]> for RoleSet {
    fn from(roles: [Role; N]) -> Self {
        roles.into_iter().collect()
    }
}

impl From<Role> for RoleSet {
    fn from(role: Role) -> Self {
        Self::of(role)
    }
}

impl fmt::Debug for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|r| r.as_str()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Opaque, stable user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Creates a user id, rejecting the empty string.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdentityError::EmptyUserId);
        }
        Ok(Self(id))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Profile fields cached in the session at authentication time.
///
/// The snapshot may go stale relative to durable storage until the next
/// login or an explicit [`IdentityContext::refresh`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    /// Unique login name.
    pub username: String,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
    /// Email address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Mobile number, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    /// Whether the email address has been verified.
    #[serde(default)]
    pub email_verified: bool,
}

impl ProfileSnapshot {
    /// Creates a snapshot with only a username.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    /// Sets the given and family names.
    #[must_use]
    pub fn with_name(
        mut self,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        self.first_name = first_name.into();
        self.last_name = last_name.into();
        self
    }

    /// Sets the email address and its verification flag.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }
}

/// The resolved, request-scoped caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityContext {
    user_id: UserId,
    role: Role,
    profile: ProfileSnapshot,
    authenticated_at: DateTime<Utc>,
}

impl IdentityContext {
    /// Creates an identity authenticated now.
    #[must_use]
    pub fn new(user_id: UserId, role: Role, profile: ProfileSnapshot) -> Self {
        Self {
            user_id,
            role,
            profile,
            authenticated_at: Utc::now(),
        }
    }

    /// Overrides the authentication timestamp.
    #[must_use]
    pub fn with_authenticated_at(mut self, at: DateTime<Utc>) -> Self {
        self.authenticated_at = at;
        self
    }

    /// Returns the user id.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Returns the role cached in the session.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the cached profile snapshot.
    #[must_use]
    pub fn profile(&self) -> &ProfileSnapshot {
        &self.profile
    }

    /// Returns the cached username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.profile.username
    }

    /// Returns when the session was established.
    #[must_use]
    pub fn authenticated_at(&self) -> DateTime<Utc> {
        self.authenticated_at
    }

    /// Returns `true` if the caller holds the admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    /// Returns `true` if `username` names the caller's own account.
    #[must_use]
    pub fn is_self(&self, username: &str) -> bool {
        self.profile.username == username
    }

    /// Returns a string identifier suitable for logging.
    ///
    /// Never includes profile data.
    #[must_use]
    pub fn log_id(&self) -> String {
        format!("user:{}", self.user_id)
    }

    /// Replaces the cached snapshot after the user updated their own record.
    ///
    /// This is the only mutation an identity ever sees. A changed role is
    /// reported back so the session layer can force re-authentication.
    pub fn refresh(&mut self, role: Role, profile: ProfileSnapshot) -> RefreshOutcome {
        let previous = self.role;
        self.role = role;
        self.profile = profile;
        if previous == role {
            RefreshOutcome::ProfileUpdated
        } else {
            RefreshOutcome::RoleChanged {
                previous,
                current: role,
            }
        }
    }
}

/// Result of [`IdentityContext::refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Only profile fields changed.
    ProfileUpdated,
    /// The role changed; permission decisions made on the old role are stale.
    RoleChanged {
        /// Role before the refresh.
        previous: Role,
        /// Role after the refresh.
        current: Role,
    },
}

impl RefreshOutcome {
    /// Returns `true` if the session must be re-established.
    #[must_use]
    pub const fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::RoleChanged { .. })
    }
}

/// The cached user object stored in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    /// Profile fields.
    #[serde(flatten)]
    pub profile: ProfileSnapshot,
    /// Role name as stored; validated on conversion.
    pub role: String,
}

/// Raw session data as the session provider stores it.
///
/// Every field is optional because session storage is external and may be
/// partially written or tampered with.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Authenticated user id.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Cached user snapshot.
    #[serde(default)]
    pub user: Option<SessionUser>,
    /// When the session was established.
    #[serde(default)]
    pub authenticated_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Builds the record stored for a freshly authenticated identity.
    #[must_use]
    pub fn from_identity(identity: &IdentityContext) -> Self {
        Self {
            user_id: Some(identity.user_id.to_string()),
            user: Some(SessionUser {
                profile: identity.profile.clone(),
                role: identity.role.as_str().to_string(),
            }),
            authenticated_at: Some(identity.authenticated_at),
        }
    }

    /// Converts the record into an identity.
    ///
    /// - no user id and no user snapshot: `Ok(None)` (anonymous)
    /// - both present with a known role: `Ok(Some(identity))`
    /// - anything else: `Err`
    pub fn into_identity(self) -> Result<Option<IdentityContext>, IdentityError> {
        match (self.user_id, self.user) {
            (None, None) => Ok(None),
            (Some(user_id), Some(user)) => {
                let user_id = UserId::new(user_id)?;
                let role = user.role.parse::<Role>()?;
                let mut identity = IdentityContext::new(user_id, role, user.profile);
                if let Some(at) = self.authenticated_at {
                    identity.authenticated_at = at;
                }
                Ok(Some(identity))
            }
            (user_id, user) => Err(IdentityError::Incomplete {
                has_user_id: user_id.is_some(),
                has_profile: user.is_some(),
            }),
        }
    }
}
