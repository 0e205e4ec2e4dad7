//! The permission matrix and its live, versioned handle.
//!
//! A [`PermissionMatrix`] maps role to permission to boolean. It is plain
//! data: the admin override lives in the policy engine, not here.
//!
//! The process holds exactly one live matrix in a [`MatrixHandle`]. Writers
//! never touch a published matrix; they build a new [`VersionedMatrix`] and
//! swap the `Arc` under a write lock. Readers clone the `Arc` and release the
//! lock immediately, so an evaluation that captured a snapshot keeps seeing
//! that whole snapshot even if a replacement lands mid-flight.
//!
//! ```text
//!   replace(new) ──► build VersionedMatrix{v+1} ──► write lock: swap Arc
//!                                                        │
//!   evaluate ──► read lock: clone Arc ──► decide against snapshot v or v+1
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use atlas_core::{CollaboratorError, Role};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{AuthzError, AuthzResult};
use crate::permission::{Permission, PermissionRef};

/// Role to permission to boolean.
///
/// A missing cell is equivalent to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct PermissionMatrix {
    grants: BTreeMap<Role, BTreeMap<Permission, bool>>,
}

/// Something in a stored matrix document that was skipped while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixWarning {
    /// A top-level key that is not a role.
    UnknownRole(String),
    /// A role entry that is not an object.
    InvalidRoleEntry(Role),
    /// A permission key with no matrix column.
    UnknownPermission {
        /// Role the key appeared under.
        role: Role,
        /// The unrecognized key.
        key: String,
    },
    /// A cell whose value is not a boolean.
    NonBooleanValue {
        /// Role of the cell.
        role: Role,
        /// Permission of the cell.
        permission: Permission,
    },
}

impl PermissionMatrix {
    /// Creates a matrix that grants nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The matrix materialized on first access when none is stored.
    ///
    /// Clients get nothing. Support staff see the dashboard, knowledge base
    /// and chat logs. Supervisors add user management, user import and read
    /// access to model and company settings. Managers and admins get
    /// everything.
    #[must_use]
    pub fn default_matrix() -> Self {
        use Permission::{
            CanImportUsers, CanManageKB, CanManageUsers, CanViewChatLogs,
            CanViewCompanySettings, CanViewDashboard, CanViewModelConfig,
        };

        let mut matrix = Self::new();
        matrix.set_role(Role::Client, &[]);
        matrix.set_role(
            Role::Support,
            &[CanViewDashboard, CanManageKB, CanViewChatLogs],
        );
        matrix.set_role(
            Role::Supervisor,
            &[
                CanViewDashboard,
                CanManageUsers,
                CanManageKB,
                CanViewModelConfig,
                CanViewCompanySettings,
                CanViewChatLogs,
                CanImportUsers,
            ],
        );
        matrix.set_role(Role::Manager, &Permission::ALL);
        matrix.set_role(Role::Admin, &Permission::ALL);
        matrix
    }

    /// Sets a whole role row: `granted` become `true`, every other known
    /// permission `false`.
    pub fn set_role(&mut self, role: Role, granted: &[Permission]) {
        let row = Permission::ALL
            .into_iter()
            .map(|p| (p, granted.contains(&p)))
            .collect();
        self.grants.insert(role, row);
    }

    /// Sets a single cell.
    pub fn set(&mut self, role: Role, permission: Permission, granted: bool) {
        self.grants
            .entry(role)
            .or_default()
            .insert(permission, granted);
    }

    /// Returns a copy with a single cell set.
    #[must_use]
    pub fn with(mut self, role: Role, permission: Permission, granted: bool) -> Self {
        self.set(role, permission, granted);
        self
    }

    /// Returns whether the matrix grants `permission` to `role`.
    #[must_use]
    pub fn is_granted(&self, role: Role, permission: Permission) -> bool {
        self.grants
            .get(&role)
            .and_then(|row| row.get(&permission))
            .copied()
            .unwrap_or(false)
    }

    /// Looks up a guard's permission. Unknown names are never granted.
    #[must_use]
    pub fn lookup(&self, role: Role, permission: &PermissionRef) -> bool {
        permission
            .known()
            .is_some_and(|p| self.is_granted(role, p))
    }

    /// Returns the permissions granted to `role`.
    #[must_use]
    pub fn granted(&self, role: Role) -> Vec<Permission> {
        self.grants
            .get(&role)
            .map(|row| {
                row.iter()
                    .filter(|(_, granted)| **granted)
                    .map(|(p, _)| *p)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the roles that have a row in the matrix.
    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.grants.keys().copied()
    }

    /// Parses a stored matrix document, logging anything it skips.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidMatrix`] if the document is not a JSON
    /// object. Unknown keys and non-boolean cells are skipped, not errors.
    pub fn from_json(value: &Value) -> AuthzResult<Self> {
        let (matrix, warnings) = Self::from_json_with_warnings(value)?;
        for warning in &warnings {
            match warning {
                MatrixWarning::UnknownRole(key) => {
                    warn!(role = %key, "ignoring unknown role in permission matrix");
                }
                MatrixWarning::InvalidRoleEntry(role) => {
                    warn!(%role, "ignoring permission matrix entry that is not an object");
                }
                MatrixWarning::UnknownPermission { role, key } => {
                    warn!(
                        %role,
                        permission = %key,
                        "ignoring unknown permission in permission matrix"
                    );
                }
                MatrixWarning::NonBooleanValue { role, permission } => {
                    warn!(%role, %permission, "ignoring non-boolean permission matrix value");
                }
            }
        }
        Ok(matrix)
    }

    /// Parses a stored matrix document and returns what was skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthzError::InvalidMatrix`] if the document is not a JSON
    /// object.
    pub fn from_json_with_warnings(value: &Value) -> AuthzResult<(Self, Vec<MatrixWarning>)> {
        let object = value
            .as_object()
            .ok_or_else(|| AuthzError::invalid_matrix("expected an object keyed by role"))?;

        let mut matrix = Self::new();
        let mut warnings = Vec::new();

        for (role_key, entry) in object {
            let Ok(role) = role_key.parse::<Role>() else {
                warnings.push(MatrixWarning::UnknownRole(role_key.clone()));
                continue;
            };
            let Some(cells) = entry.as_object() else {
                warnings.push(MatrixWarning::InvalidRoleEntry(role));
                continue;
            };
            matrix.grants.entry(role).or_default();
            parse_row(&mut matrix, role, cells, &mut warnings);
        }

        Ok((matrix, warnings))
    }

    /// Renders the matrix as a stored document.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

fn parse_row(
    matrix: &mut PermissionMatrix,
    role: Role,
    cells: &Map<String, Value>,
    warnings: &mut Vec<MatrixWarning>,
) {
    for (key, value) in cells {
        let Ok(permission) = key.parse::<Permission>() else {
            warnings.push(MatrixWarning::UnknownPermission {
                role,
                key: key.clone(),
            });
            continue;
        };
        match value.as_bool() {
            Some(granted) => matrix.set(role, permission, granted),
            None => warnings.push(MatrixWarning::NonBooleanValue { role, permission }),
        }
    }
}

impl<'de> Deserialize<'de> for PermissionMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// A published matrix with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedMatrix {
    version: u64,
    loaded_at: DateTime<Utc>,
    matrix: PermissionMatrix,
}

impl VersionedMatrix {
    /// Wraps a matrix with an explicit version.
    #[must_use]
    pub fn new(version: u64, matrix: PermissionMatrix) -> Self {
        Self {
            version,
            loaded_at: Utc::now(),
            matrix,
        }
    }

    /// Monotonic version, starting at 1.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// When this version became live.
    #[must_use]
    pub const fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// The matrix data.
    #[must_use]
    pub const fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }
}

/// Supplies the matrix snapshot for one evaluation.
///
/// Guards call this at most once per evaluation and only when a permission
/// check needs the matrix.
pub trait MatrixSource: Send + Sync {
    /// Returns the current snapshot, or `None` if no matrix is configured.
    ///
    /// # Errors
    ///
    /// Returns a [`CollaboratorError`] if the snapshot cannot be produced.
    fn current(&self) -> Result<Option<Arc<VersionedMatrix>>, CollaboratorError>;
}

/// A fixed snapshot; useful for injecting a matrix into a single evaluation.
impl MatrixSource for Option<Arc<VersionedMatrix>> {
    fn current(&self) -> Result<Option<Arc<VersionedMatrix>>, CollaboratorError> {
        Ok(self.clone())
    }
}

/// The live matrix cell shared by every request.
///
/// Cloning the handle shares the cell.
#[derive(Debug, Clone, Default)]
pub struct MatrixHandle {
    inner: Arc<RwLock<Option<Arc<VersionedMatrix>>>>,
}

impl MatrixHandle {
    /// Creates a handle with no matrix; permission checks fail closed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle with `matrix` published as version 1.
    #[must_use]
    pub fn with_matrix(matrix: PermissionMatrix) -> Self {
        let handle = Self::new();
        handle.replace(matrix);
        handle
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<VersionedMatrix>> {
        self.inner.read().clone()
    }

    /// Returns the current version, if a matrix is published.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.inner.read().as_ref().map(|m| m.version())
    }

    /// Publishes `matrix` as the next version and returns it.
    ///
    /// Snapshots taken before the swap are unaffected.
    pub fn replace(&self, matrix: PermissionMatrix) -> Arc<VersionedMatrix> {
        let mut slot = self.inner.write();
        let version = slot.as_ref().map_or(1, |m| m.version() + 1);
        let published = Arc::new(VersionedMatrix::new(version, matrix));
        *slot = Some(Arc::clone(&published));
        published
    }
}

impl MatrixSource for MatrixHandle {
    fn current(&self) -> Result<Option<Arc<VersionedMatrix>>, CollaboratorError> {
        Ok(self.snapshot())
    }
}
