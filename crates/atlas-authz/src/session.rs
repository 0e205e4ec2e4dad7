//! Session tokens and the identity provider seam.
//!
//! The authorization core never parses a session. It hands the opaque
//! [`SessionToken`] to an [`IdentityProvider`] and gets back the raw
//! [`SessionRecord`] cached at login, which it then validates.
//!
//! [`InMemorySessionStore`] is a process-local provider: it creates sessions
//! at login, drops them at logout, and applies the explicit refresh that
//! follows a self-update. A refresh that changes the caller's role destroys
//! the session, so permission decisions are never made on a role the user no
//! longer holds.

use std::collections::HashMap;
use std::fmt;

use atlas_core::{
    CollaboratorError, IdentityContext, ProfileSnapshot, RefreshOutcome, Role, SessionRecord,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuthzResult;
use crate::BoxFuture;

/// Opaque session token, as carried by the session cookie.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wraps a token received from a client.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials; keep them out of logs.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

impl From<&str> for SessionToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for SessionToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// How a session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    /// Username and password.
    Password,
    /// A federated identity provider (social login).
    Federated,
    /// A WebAuthn passkey.
    Passkey,
}

impl LoginMethod {
    /// Returns the method name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Federated => "federated",
            Self::Passkey => "passkey",
        }
    }
}

/// Resolves a session token to the record cached at login.
pub trait IdentityProvider: Send + Sync {
    /// Returns the session record, or `None` for an unknown or expired token.
    fn resolve<'a>(
        &'a self,
        token: &'a SessionToken,
    ) -> BoxFuture<'a, Result<Option<SessionRecord>, CollaboratorError>>;
}

#[derive(Debug, Clone)]
struct StoredSession {
    record: SessionRecord,
    method: Option<LoginMethod>,
}

/// Sessions held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionToken, StoredSession>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session for a freshly authenticated identity.
    pub fn login(&self, identity: &IdentityContext, method: LoginMethod) -> SessionToken {
        let token = SessionToken::generate();
        self.sessions.write().insert(
            token.clone(),
            StoredSession {
                record: SessionRecord::from_identity(identity),
                method: Some(method),
            },
        );
        info!(
            user_id = %identity.log_id(),
            role = identity.role().as_str(),
            method = method.as_str(),
            "session created"
        );
        token
    }

    /// Stores a raw record under `token`, as an external session store would.
    pub fn insert_record(&self, token: SessionToken, record: SessionRecord) {
        self.sessions.write().insert(
            token,
            StoredSession {
                record,
                method: None,
            },
        );
    }

    /// Destroys a session. Returns `false` if it did not exist.
    pub fn logout(&self, token: &SessionToken) -> bool {
        let removed = self.sessions.write().remove(token).is_some();
        if removed {
            info!("session destroyed");
        }
        removed
    }

    /// Applies a self-update to the cached snapshot.
    ///
    /// Returns `None` for an unknown token. When the role changed, the
    /// session is destroyed and the caller must log in again.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::MalformedIdentity`](crate::AuthzError) if the
    /// stored record is not a valid identity.
    pub fn refresh(
        &self,
        token: &SessionToken,
        role: Role,
        profile: ProfileSnapshot,
    ) -> AuthzResult<Option<RefreshOutcome>> {
        let mut sessions = self.sessions.write();
        let Some(stored) = sessions.get_mut(token) else {
            return Ok(None);
        };
        let Some(mut identity) = stored.record.clone().into_identity()? else {
            return Ok(None);
        };

        let outcome = identity.refresh(role, profile);
        match outcome {
            RefreshOutcome::ProfileUpdated => {
                stored.record = SessionRecord::from_identity(&identity);
            }
            RefreshOutcome::RoleChanged { previous, current } => {
                sessions.remove(token);
                warn!(
                    user_id = %identity.log_id(),
                    previous = previous.as_str(),
                    current = current.as_str(),
                    "role changed, session destroyed"
                );
            }
        }
        Ok(Some(outcome))
    }

    /// How the session behind `token` was established, if known.
    #[must_use]
    pub fn login_method(&self, token: &SessionToken) -> Option<LoginMethod> {
        self.sessions.read().get(token).and_then(|s| s.method)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl IdentityProvider for InMemorySessionStore {
    fn resolve<'a>(
        &'a self,
        token: &'a SessionToken,
    ) -> BoxFuture<'a, Result<Option<SessionRecord>, CollaboratorError>> {
        let record = self.sessions.read().get(token).map(|s| s.record.clone());
        Box::pin(async move { Ok(record) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuthzError;
    use atlas_core::{SessionUser, UserId};

    fn identity(role: Role) -> IdentityContext {
        IdentityContext::new(
            UserId::new("64f1c2").unwrap(),
            role,
            ProfileSnapshot::new("mina").with_email("mina@example.com", true),
        )
    }

    #[test]
    fn test_token_debug_is_redacted() {
        let token = SessionToken::new("s3cr3t");
        assert_eq!(format!("{token:?}"), "SessionToken(..)");
        assert_eq!(token.as_str(), "s3cr3t");
        assert_ne!(SessionToken::generate(), SessionToken::generate());
    }

    #[tokio::test]
    async fn test_login_then_resolve() {
        let store = InMemorySessionStore::new();
        let token = store.login(&identity(Role::Support), LoginMethod::Passkey);

        let record = store.resolve(&token).await.unwrap().unwrap();
        let resolved = record.into_identity().unwrap().unwrap();
        assert_eq!(resolved.role(), Role::Support);
        assert_eq!(resolved.username(), "mina");
        assert_eq!(store.login_method(&token), Some(LoginMethod::Passkey));
    }

    #[tokio::test]
    async fn test_unknown_token_is_anonymous() {
        let store = InMemorySessionStore::new();
        let token = SessionToken::new("nope");
        assert!(store.resolve(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_logout() {
        let store = InMemorySessionStore::new();
        let token = store.login(&identity(Role::Client), LoginMethod::Password);
        assert!(store.logout(&token));
        assert!(!store.logout(&token));
        assert!(store.resolve(&token).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_refresh_profile_keeps_session() {
        let store = InMemorySessionStore::new();
        let token = store.login(&identity(Role::Support), LoginMethod::Password);

        let outcome = store
            .refresh(&token, Role::Support, ProfileSnapshot::new("mina").with_name("Mina", "K"))
            .unwrap();

        assert_eq!(outcome, Some(RefreshOutcome::ProfileUpdated));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_refresh_role_change_destroys_session() {
        let store = InMemorySessionStore::new();
        let token = store.login(&identity(Role::Support), LoginMethod::Federated);

        let outcome = store
            .refresh(&token, Role::Manager, ProfileSnapshot::new("mina"))
            .unwrap()
            .unwrap();

        assert!(outcome.requires_reauthentication());
        assert!(store.is_empty());
    }

    #[test]
    fn test_refresh_unknown_token() {
        let store = InMemorySessionStore::new();
        let outcome = store
            .refresh(&SessionToken::new("gone"), Role::Client, ProfileSnapshot::new("x"))
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[test]
    fn test_refresh_malformed_record() {
        let store = InMemorySessionStore::new();
        let token = SessionToken::new("broken");
        store.insert_record(
            token.clone(),
            SessionRecord {
                user_id: Some("64f1c2".into()),
                user: Some(SessionUser {
                    profile: ProfileSnapshot::new("mina"),
                    role: "overlord".into(),
                }),
                authenticated_at: None,
            },
        );

        let err = store
            .refresh(&token, Role::Client, ProfileSnapshot::new("mina"))
            .unwrap_err();
        assert!(matches!(err, AuthzError::MalformedIdentity(_)));
    }
}
