//! Permission identifiers.
//!
//! The matrix is keyed by the fourteen conventional permission names. Guards
//! may still name a permission by string; a name that is not one of these
//! resolves to [`PermissionRef::Unknown`] and is never granted, so a guard for
//! a permission that ships before its matrix migration fails closed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A known permission flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    /// View the statistics dashboard.
    CanViewDashboard,
    /// List, create, update and delete users.
    CanManageUsers,
    /// Edit the permission matrix.
    CanManageRoles,
    /// Edit the knowledge base.
    CanManageKB,
    /// View model configuration.
    CanViewModelConfig,
    /// Edit model configuration, API keys and custom models.
    CanEditModelConfig,
    /// View company settings.
    CanViewCompanySettings,
    /// Edit company settings.
    CanEditCompanySettings,
    /// Read chat transcripts.
    CanViewChatLogs,
    /// View SMTP settings.
    CanViewSmtpSettings,
    /// Edit SMTP settings.
    CanEditSmtpSettings,
    /// Customize the admin panel.
    CanCustomizePanel,
    /// Create, restore and schedule backups.
    CanManageBackups,
    /// Bulk-import users.
    CanImportUsers,
}

impl Permission {
    /// Every known permission.
    pub const ALL: [Permission; 14] = [
        Permission::CanViewDashboard,
        Permission::CanManageUsers,
        Permission::CanManageRoles,
        Permission::CanManageKB,
        Permission::CanViewModelConfig,
        Permission::CanEditModelConfig,
        Permission::CanViewCompanySettings,
        Permission::CanEditCompanySettings,
        Permission::CanViewChatLogs,
        Permission::CanViewSmtpSettings,
        Permission::CanEditSmtpSettings,
        Permission::CanCustomizePanel,
        Permission::CanManageBackups,
        Permission::CanImportUsers,
    ];

    /// Returns the key used in stored matrix documents.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::CanViewDashboard => "canViewDashboard",
            Self::CanManageUsers => "canManageUsers",
            Self::CanManageRoles => "canManageRoles",
            Self::CanManageKB => "canManageKB",
            Self::CanViewModelConfig => "canViewModelConfig",
            Self::CanEditModelConfig => "canEditModelConfig",
            Self::CanViewCompanySettings => "canViewCompanySettings",
            Self::CanEditCompanySettings => "canEditCompanySettings",
            Self::CanViewChatLogs => "canViewChatLogs",
            Self::CanViewSmtpSettings => "canViewSmtpSettings",
            Self::CanEditSmtpSettings => "canEditSmtpSettings",
            Self::CanCustomizePanel => "canCustomizePanel",
            Self::CanManageBackups => "canManageBackups",
            Self::CanImportUsers => "canImportUsers",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A permission key that is not one of the known flags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.key() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

/// The permission a guard asks for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PermissionRef {
    /// A known flag, looked up in the matrix.
    Known(Permission),
    /// A name with no matrix column. Never granted to non-admin roles.
    Unknown(String),
}

impl PermissionRef {
    /// Resolves a permission name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        name.parse()
            .map_or_else(|_| Self::Unknown(name.to_string()), Self::Known)
    }

    /// Returns the permission name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Known(p) => p.key(),
            Self::Unknown(name) => name,
        }
    }

    /// Returns the known permission, if any.
    #[must_use]
    pub const fn known(&self) -> Option<Permission> {
        match self {
            Self::Known(p) => Some(*p),
            Self::Unknown(_) => None,
        }
    }
}

impl From<Permission> for PermissionRef {
    fn from(permission: Permission) -> Self {
        Self::Known(permission)
    }
}

impl From<&str> for PermissionRef {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

impl fmt::Display for PermissionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
