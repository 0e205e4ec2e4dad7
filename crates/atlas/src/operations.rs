//! Admin operation catalog.
//!
//! Every protected operation of the admin API, with the route it is served
//! on and the static guard that protects it. Guards are built once, at
//! startup, into a [`GuardCatalog`].
//!
//! Routers (`/api/users`, `/api/stats`, ...) apply `authenticated` to every
//! route; some add a router-wide permission (`stats` needs
//! `canViewDashboard`, `backup` needs `canManageBackups`).

use std::collections::HashMap;

use atlas_authz::{Guard, Permission};
use atlas_core::{Role, RoleSet};
use http::Method;

/// What an operation requires beyond its route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Any authenticated caller.
    Authenticated,
    /// An authenticated caller whose role holds the permission.
    Permission(Permission),
    /// The account owner, or an admin.
    SelfOrAdmin,
    /// The account owner only.
    SelfOnly,
}

macro_rules! admin_operations {
    ($($variant:ident => $name:literal, $method:ident $path:literal, $access:expr;)+) => {
        /// A protected admin API operation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum AdminOperation {
            $(
                #[doc = concat!("`", stringify!($method), " ", $path, "`")]
                $variant,
            )+
        }

        impl AdminOperation {
            /// Every operation, in route order.
            pub const ALL: &'static [AdminOperation] = &[$(AdminOperation::$variant),+];

            /// Stable name, used as the guard name in audit records.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }

            /// HTTP method the operation is served on.
            #[must_use]
            pub fn method(self) -> Method {
                match self {
                    $(Self::$variant => Method::$method,)+
                }
            }

            /// Route template; `:param` segments match any value.
            #[must_use]
            pub const fn path(self) -> &'static str {
                match self {
                    $(Self::$variant => $path,)+
                }
            }

            /// What the caller needs.
            #[must_use]
            pub const fn access(self) -> Access {
                match self {
                    $(Self::$variant => $access,)+
                }
            }
        }
    };
}

use Access::{Authenticated, SelfOnly, SelfOrAdmin};
use Permission::{
    CanCustomizePanel, CanEditCompanySettings, CanEditModelConfig, CanEditSmtpSettings,
    CanImportUsers, CanManageBackups, CanManageKB, CanManageRoles, CanManageUsers,
    CanViewChatLogs, CanViewCompanySettings, CanViewDashboard, CanViewModelConfig,
    CanViewSmtpSettings,
};

admin_operations! {
    UsersList => "users.list", GET "/api/users", Access::Permission(CanManageUsers);
    UsersCreate => "users.create", POST "/api/users", Access::Permission(CanManageUsers);
    UsersUpdate => "users.update", PUT "/api/users/:username", Access::Permission(CanManageUsers);
    UsersDelete => "users.delete", DELETE "/api/users/:username", Access::Permission(CanManageUsers);
    UsersImport => "users.import", POST "/api/users/import", Access::Permission(CanImportUsers);
    UsersUpdatePassword => "users.update_password", POST "/api/users/:username/update-password", SelfOrAdmin;
    UsersRegisterPasskey => "users.register_passkey", POST "/api/users/:username/register-passkey", SelfOnly;

    KnowledgeBaseList => "kb.list", GET "/api/kb", Authenticated;
    KnowledgeBaseCreate => "kb.create", POST "/api/kb", Access::Permission(CanManageKB);
    KnowledgeBaseUpdate => "kb.update", PUT "/api/kb/:id", Access::Permission(CanManageKB);
    KnowledgeBaseDelete => "kb.delete", DELETE "/api/kb/:id", Access::Permission(CanManageKB);

    ChatLogs => "chat.logs", GET "/api/chat/logs", Access::Permission(CanViewChatLogs);
    ChatLog => "chat.log", GET "/api/chat/logs/:id", Access::Permission(CanViewChatLogs);
    ChatFeedback => "chat.feedback", POST "/api/chat/feedback", Authenticated;
    ChatSave => "chat.save", POST "/api/chat/save", Authenticated;

    ConfigPermissionsRead => "config.permissions.read", GET "/api/config/permissions", Authenticated;
    ConfigPermissionsReplace => "config.permissions.replace", PUT "/api/config/permissions", Access::Permission(CanManageRoles);
    ConfigModelRead => "config.model.read", GET "/api/config/model", Access::Permission(CanViewModelConfig);
    ConfigModelUpdate => "config.model.update", PUT "/api/config/model", Access::Permission(CanEditModelConfig);
    ConfigCompanyRead => "config.company.read", GET "/api/config/company", Access::Permission(CanViewCompanySettings);
    ConfigCompanyUpdate => "config.company.update", PUT "/api/config/company", Access::Permission(CanEditCompanySettings);
    ConfigPanelRead => "config.panel.read", GET "/api/config/panel", Authenticated;
    ConfigPanelUpdate => "config.panel.update", PUT "/api/config/panel", Access::Permission(CanCustomizePanel);
    ConfigSmtpRead => "config.smtp.read", GET "/api/config/smtp", Access::Permission(CanViewSmtpSettings);
    ConfigSmtpUpdate => "config.smtp.update", PUT "/api/config/smtp", Access::Permission(CanEditSmtpSettings);
    ConfigApiKeysRead => "config.api_keys.read", GET "/api/config/api-keys", Access::Permission(CanEditModelConfig);
    ConfigApiKeysUpdate => "config.api_keys.update", POST "/api/config/api-keys", Access::Permission(CanEditModelConfig);
    ConfigCustomModelsList => "config.custom_models.list", GET "/api/config/custom-models", Authenticated;
    ConfigCustomModelsCreate => "config.custom_models.create", POST "/api/config/custom-models", Access::Permission(CanEditModelConfig);
    ConfigCustomModelsUpdate => "config.custom_models.update", PUT "/api/config/custom-models/:id", Access::Permission(CanEditModelConfig);
    ConfigCustomModelsDelete => "config.custom_models.delete", DELETE "/api/config/custom-models/:id", Access::Permission(CanEditModelConfig);

    StatsActivity => "stats.activity", GET "/api/stats/activity", Access::Permission(CanViewDashboard);
    StatsFeedback => "stats.feedback", GET "/api/stats/feedback", Access::Permission(CanViewDashboard);
    StatsKbCount => "stats.kb_count", GET "/api/stats/kb-count", Access::Permission(CanViewDashboard);
    StatsLogCount => "stats.log_count", GET "/api/stats/log-count", Access::Permission(CanViewDashboard);
    StatsRoleDistribution => "stats.role_distribution", GET "/api/stats/role-distribution", Access::Permission(CanViewDashboard);
    StatsUnansweredCount => "stats.unanswered_count", GET "/api/stats/unanswered-count", Access::Permission(CanViewDashboard);
    StatsUserCount => "stats.user_count", GET "/api/stats/user-count", Access::Permission(CanViewDashboard);
    StatsVolumeByHour => "stats.volume_by_hour", GET "/api/stats/volume-by-hour", Access::Permission(CanViewDashboard);

    BackupList => "backup.list", GET "/api/backup", Access::Permission(CanManageBackups);
    BackupRestore => "backup.restore", POST "/api/backup/restore", Access::Permission(CanManageBackups);
    BackupScheduleRead => "backup.schedule.read", GET "/api/backup/schedule", Access::Permission(CanManageBackups);
    BackupScheduleUpdate => "backup.schedule.update", PUT "/api/backup/schedule", Access::Permission(CanManageBackups);
    BackupDriveStatus => "backup.gdrive.status", GET "/api/backup/gdrive", Access::Permission(CanManageBackups);
    BackupDriveConnect => "backup.gdrive.connect", POST "/api/backup/gdrive/connect", Access::Permission(CanManageBackups);
    BackupDriveDisconnect => "backup.gdrive.disconnect", POST "/api/backup/gdrive/disconnect", Access::Permission(CanManageBackups);
}

impl AdminOperation {
    /// Builds the operation's guard. Every guard starts with `authenticated`.
    #[must_use]
    pub fn guard(self) -> Guard {
        let builder = Guard::builder(self.name()).authenticated();
        match self.access() {
            Access::Authenticated => builder,
            Access::Permission(permission) => builder.permission(permission),
            Access::SelfOrAdmin => builder.self_or_roles(RoleSet::of(Role::Admin)),
            Access::SelfOnly => builder.self_or_roles(RoleSet::empty()),
        }
        .build()
    }

    /// For self-service operations, how many path segments follow the
    /// `:username` segment.
    #[must_use]
    pub fn target_segment(self) -> Option<usize> {
        match self.access() {
            Access::SelfOrAdmin | Access::SelfOnly => {
                let mut segments = self.path().rsplit('/');
                segments.position(|segment| segment == ":username")
            }
            _ => None,
        }
    }

    /// Returns `true` if `method` and `path` address this operation.
    #[must_use]
    pub fn matches(self, method: &Method, path: &str) -> bool {
        if *method != self.method() {
            return false;
        }
        let mut template = self.path().split('/');
        let mut actual = path.trim_end_matches('/').split('/');
        loop {
            match (template.next(), actual.next()) {
                (None, None) => return true,
                (Some(expected), Some(segment)) => {
                    let is_param = expected.starts_with(':');
                    if (is_param && segment.is_empty()) || (!is_param && expected != segment) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }

    /// Finds the operation served on `method` and `path`.
    ///
    /// Literal segments win over parameters, so `POST /api/users/import` is
    /// the import, not a user named `import`.
    #[must_use]
    pub fn resolve(method: &Method, path: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|operation| operation.matches(method, path))
            .min_by_key(|operation| operation.path().matches(':').count())
    }
}

impl std::fmt::Display for AdminOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Guards for every [`AdminOperation`], built once.
#[derive(Debug, Clone)]
pub struct GuardCatalog {
    guards: HashMap<AdminOperation, Guard>,
}

impl GuardCatalog {
    /// Builds the guard of every operation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            guards: AdminOperation::ALL
                .iter()
                .map(|operation| (*operation, operation.guard()))
                .collect(),
        }
    }

    /// The guard for `operation`.
    #[must_use]
    pub fn guard(&self, operation: AdminOperation) -> Option<&Guard> {
        self.guards.get(&operation)
    }

    /// Number of guards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Returns `true` if the catalog holds no guards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Iterates over operations and their guards in route order.
    pub fn iter(&self) -> impl Iterator<Item = (AdminOperation, &Guard)> + '_ {
        AdminOperation::ALL
            .iter()
            .filter_map(|operation| self.guards.get(operation).map(|guard| (*operation, guard)))
    }
}

impl Default for GuardCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_authz::{
        Check, Decision, DenyReason, GuardRequest, MatrixHandle, MemoryAuditSink, PermissionMatrix,
    };
    use atlas_core::{IdentityContext, ProfileSnapshot, UserId};
    use std::collections::HashSet;

    fn caller(role: Role, username: &str) -> IdentityContext {
        IdentityContext::new(
            UserId::new(format!("id-{username}")).unwrap(),
            role,
            ProfileSnapshot::new(username),
        )
    }

    fn decide(
        operation: AdminOperation,
        identity: Option<&IdentityContext>,
        target: Option<&str>,
    ) -> Decision {
        let matrix = MatrixHandle::with_matrix(PermissionMatrix::default_matrix());
        let mut request = GuardRequest::new(identity);
        if let Some(target) = target {
            request = request.with_target(target);
        }
        operation.guard().evaluate(&request, &matrix, &MemoryAuditSink::new())
    }

    #[test]
    fn test_names_and_routes_are_unique() {
        let names: HashSet<_> = AdminOperation::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(names.len(), AdminOperation::ALL.len());

        let routes: HashSet<_> = AdminOperation::ALL
            .iter()
            .map(|op| (op.method(), op.path()))
            .collect();
        assert_eq!(routes.len(), AdminOperation::ALL.len());
    }

    #[test]
    fn test_every_guard_starts_with_authenticated() {
        for operation in AdminOperation::ALL {
            let guard = operation.guard();
            assert_eq!(guard.name(), operation.name());
            assert_eq!(guard.checks().first(), Some(&Check::Authenticated), "{operation}");
        }
    }

    #[test]
    fn test_router_wide_permissions() {
        for operation in AdminOperation::ALL {
            let expected = if operation.path().starts_with("/api/stats") {
                Some(Access::Permission(Permission::CanViewDashboard))
            } else if operation.path().starts_with("/api/backup") {
                Some(Access::Permission(Permission::CanManageBackups))
            } else {
                None
            };
            if let Some(expected) = expected {
                assert_eq!(operation.access(), expected, "{operation}");
            }
        }
    }

    #[test]
    fn test_matrix_replacement_guard_matches_authorizer() {
        assert_eq!(
            AdminOperation::ConfigPermissionsReplace.name(),
            atlas_authz::AuthzConfig::default().replace_guard_name
        );
        assert_eq!(
            AdminOperation::ConfigPermissionsRead.name(),
            atlas_authz::AuthzConfig::default().read_guard_name
        );
    }

    #[test]
    fn test_resolve_routes() {
        assert_eq!(
            AdminOperation::resolve(&Method::GET, "/api/users"),
            Some(AdminOperation::UsersList)
        );
        assert_eq!(
            AdminOperation::resolve(&Method::PUT, "/api/users/mina/"),
            Some(AdminOperation::UsersUpdate)
        );
        assert_eq!(
            AdminOperation::resolve(&Method::POST, "/api/users/import"),
            Some(AdminOperation::UsersImport)
        );
        assert_eq!(
            AdminOperation::resolve(&Method::POST, "/api/users/mina/update-password"),
            Some(AdminOperation::UsersUpdatePassword)
        );
        assert_eq!(
            AdminOperation::resolve(&Method::GET, "/api/chat/logs/65f1"),
            Some(AdminOperation::ChatLog)
        );
        assert_eq!(AdminOperation::resolve(&Method::DELETE, "/api/stats/user-count"), None);
        assert_eq!(AdminOperation::resolve(&Method::GET, "/api/unknown"), None);
    }

    #[test]
    fn test_target_segment() {
        assert_eq!(AdminOperation::UsersUpdatePassword.target_segment(), Some(1));
        assert_eq!(AdminOperation::UsersRegisterPasskey.target_segment(), Some(1));
        assert_eq!(AdminOperation::UsersUpdate.target_segment(), None);
    }

    #[test]
    fn test_client_default_denials() {
        let client = caller(Role::Client, "ana");
        assert_eq!(
            decide(AdminOperation::StatsUserCount, Some(&client), None),
            Decision::Deny(DenyReason::InsufficientPermission)
        );
        assert!(decide(AdminOperation::KnowledgeBaseList, Some(&client), None).is_allowed());
        assert!(decide(AdminOperation::ConfigPanelRead, Some(&client), None).is_allowed());
        assert_eq!(
            decide(AdminOperation::ChatSave, None, None),
            Decision::Deny(DenyReason::NotAuthenticated)
        );
    }

    #[test]
    fn test_supervisor_can_import_but_not_edit_models() {
        let supervisor = caller(Role::Supervisor, "sam");
        assert!(decide(AdminOperation::UsersImport, Some(&supervisor), None).is_allowed());
        assert_eq!(
            decide(AdminOperation::ConfigModelUpdate, Some(&supervisor), None),
            Decision::Deny(DenyReason::InsufficientPermission)
        );
    }

    #[test]
    fn test_password_self_or_admin() {
        let ana = caller(Role::Client, "ana");
        let manager = caller(Role::Manager, "ines");
        let admin = caller(Role::Admin, "root");

        assert!(decide(AdminOperation::UsersUpdatePassword, Some(&ana), Some("ana")).is_allowed());
        assert_eq!(
            decide(AdminOperation::UsersUpdatePassword, Some(&manager), Some("ana")),
            Decision::Deny(DenyReason::InsufficientRole)
        );
        assert!(
            decide(AdminOperation::UsersUpdatePassword, Some(&admin), Some("ana")).is_allowed()
        );
    }

    #[test]
    fn test_passkey_self_only() {
        let admin = caller(Role::Admin, "root");
        assert!(
            decide(AdminOperation::UsersRegisterPasskey, Some(&admin), Some("root")).is_allowed()
        );
        assert_eq!(
            decide(AdminOperation::UsersRegisterPasskey, Some(&admin), Some("ana")),
            Decision::Deny(DenyReason::InsufficientRole)
        );
    }

    #[test]
    fn test_catalog_covers_all_operations() {
        let catalog = GuardCatalog::new();
        assert_eq!(catalog.len(), AdminOperation::ALL.len());
        assert!(!catalog.is_empty());
        let ordered: Vec<_> = catalog.iter().map(|(op, _)| op).collect();
        assert_eq!(ordered, AdminOperation::ALL);
        assert_eq!(
            catalog.guard(AdminOperation::BackupRestore).map(Guard::capability).as_deref(),
            Some("authenticated + permission:canManageBackups")
        );
    }
}
