//! Service wiring.
//!
//! [`AdminAuthService`] turns an [`AtlasConfig`] into a running authorizer:
//!
//! ```text
//! AtlasConfig ──► MatrixStore (file or in-memory)
//!             ──► AuditSink fan-out (tracing, metrics, JSON-lines file)
//!             ──► InMemorySessionStore
//!             ──► Authorizer ──► one Pipeline per AdminOperation
//! ```
//!
//! [`start`](AdminAuthService::start) loads the matrix, spawns the audit log
//! writer, and, when configured, the matrix file watcher that hot-reloads
//! external edits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use atlas_authz::{
    AuditEntry, AuditLogWriter, Authorizer, AuthzConfig, ChannelAuditSink, FanoutAuditSink,
    FileMatrixStore, InMemoryMatrixStore, InMemorySessionStore, MatrixStore, MetricsAuditSink,
    TracingAuditSink, VersionedMatrix,
};
use atlas_config::{AtlasConfig, ConfigError, FileWatcher};
use atlas_core::ErrorEnvelope;
use atlas_middleware::stages::path_segment_from_end;
use atlas_middleware::{
    BoxFuture, GuardMiddleware, MiddlewareContext, Pipeline, Request, RequestIdMiddleware,
    Response, ResponseExt, SessionMiddleware, TracingMiddleware,
};
use http::StatusCode;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{AtlasError, AtlasResult};
use crate::operations::{AdminOperation, GuardCatalog};

/// How long [`AdminAuthService::shutdown`] waits for the audit log to drain.
const AUDIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The admin API's authorization layer, ready to be mounted.
pub struct AdminAuthService {
    config: AtlasConfig,
    authorizer: Arc<Authorizer>,
    sessions: Arc<InMemorySessionStore>,
    catalog: GuardCatalog,
    pipelines: HashMap<AdminOperation, Pipeline>,
    audit_log: Option<(AuditLogWriter, mpsc::Receiver<AuditEntry>)>,
    audit_task: Option<JoinHandle<()>>,
    matrix_watcher: Option<JoinHandle<()>>,
    started: bool,
}

impl std::fmt::Debug for AdminAuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuthService")
            .field("service", &self.config.service.name)
            .field("authorizer", &self.authorizer)
            .field("operations", &self.pipelines.len())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl AdminAuthService {
    /// Builds the service from `config`. Nothing runs until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Config`] if `config` does not validate.
    pub fn from_config(config: &AtlasConfig) -> AtlasResult<Self> {
        config.validate()?;
        let authz = &config.authorization;

        let store: Arc<dyn MatrixStore> = match &authz.matrix_path {
            Some(path) => Arc::new(FileMatrixStore::new(path)),
            None => Arc::new(InMemoryMatrixStore::new()),
        };

        let mut audit = FanoutAuditSink::new().with(TracingAuditSink);
        if authz.emit_metrics {
            audit = audit.with(MetricsAuditSink);
        }
        let audit_log = match &authz.audit_log_path {
            Some(path) => {
                let (sink, rx) = ChannelAuditSink::new(authz.audit_channel_capacity);
                audit = audit.with(sink);
                Some((AuditLogWriter::new(path), rx))
            }
            None => None,
        };

        let sessions = Arc::new(InMemorySessionStore::new());
        let authorizer = Arc::new(Authorizer::new(
            AuthzConfig::new()
                .with_materialize_default_matrix(authz.materialize_default_matrix)
                .with_replace_guard_name(AdminOperation::ConfigPermissionsReplace.name()),
            store,
            sessions.clone(),
            Arc::new(audit),
        ));

        let catalog = GuardCatalog::new();
        let pipelines = catalog
            .iter()
            .map(|(operation, guard)| {
                let mut guard_stage = GuardMiddleware::new(authorizer.clone(), guard.clone());
                if let Some(skip) = operation.target_segment() {
                    guard_stage = guard_stage.with_target(path_segment_from_end(skip));
                }
                let pipeline = Pipeline::builder()
                    .stage(RequestIdMiddleware::new())
                    .stage(TracingMiddleware::new(config.service.name.clone()))
                    .stage(
                        SessionMiddleware::new(authorizer.clone())
                            .with_cookie_name(config.session.cookie_name.clone())
                            .with_header_name(config.session.header_name.clone()),
                    )
                    .stage(guard_stage)
                    .build();
                (operation, pipeline)
            })
            .collect();

        Ok(Self {
            config: config.clone(),
            authorizer,
            sessions,
            catalog,
            pipelines,
            audit_log,
            audit_task: None,
            matrix_watcher: None,
            started: false,
        })
    }

    /// Loads the permission matrix and starts the background tasks.
    ///
    /// Returns the live matrix, or `None` if none is stored and the
    /// default is not materialized.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::AlreadyStarted`] on a second call,
    /// [`AtlasError::Authz`] if the matrix store fails, and
    /// [`AtlasError::Config`] if the matrix file cannot be watched.
    #[instrument(skip(self), fields(service = %self.config.service.name))]
    pub async fn start(&mut self) -> AtlasResult<Option<Arc<VersionedMatrix>>> {
        if self.started {
            return Err(AtlasError::AlreadyStarted);
        }

        if let Some((writer, rx)) = self.audit_log.take() {
            info!(path = %writer.path().display(), "writing audit log");
            self.audit_task = Some(writer.spawn(rx));
        }

        let live = self.authorizer.start().await?;

        if self.config.authorization.watch_matrix_file {
            self.matrix_watcher = Some(self.spawn_matrix_watcher().await?);
        }

        self.started = true;
        info!(
            operations = self.pipelines.len(),
            matrix_version = live.as_ref().map(|m| m.version()),
            "admin authorization started"
        );
        Ok(live)
    }

    /// Watches the matrix file and reloads it after each settled change.
    ///
    /// Writes made through [`Authorizer::replace_matrix`] are seen too and
    /// reload as a no-op, since the stored matrix equals the live one.
    ///
    /// # Errors
    ///
    /// Returns [`AtlasError::Config`] if no matrix path is configured or the
    /// watcher cannot be created.
    pub async fn spawn_matrix_watcher(&self) -> AtlasResult<JoinHandle<()>> {
        let path = self.matrix_path()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                ConfigError::watch(format!("cannot create {}: {err}", parent.display()))
            })?;
        }

        let mut watcher = FileWatcher::new()
            .with_debounce(self.config.watch_debounce())
            .watch_file(&path)?
            .build()?;
        let authorizer = Arc::clone(&self.authorizer);
        info!(path = %path.display(), "watching permission matrix file");

        Ok(tokio::spawn(async move {
            while let Some(event) = watcher.next().await {
                debug!(
                    path = %event.path.display(),
                    kind = ?event.kind,
                    "permission matrix file changed"
                );
                match authorizer.reload_matrix().await {
                    Ok(Some(published)) => {
                        info!(
                            version = published.version(),
                            "permission matrix reloaded from file"
                        );
                    }
                    Ok(None) => debug!("permission matrix file change left the matrix unchanged"),
                    Err(err) => warn!(error = %err, "permission matrix reload failed"),
                }
            }
            debug!("permission matrix watcher stopped");
        }))
    }

    fn matrix_path(&self) -> AtlasResult<PathBuf> {
        self.config
            .authorization
            .matrix_path
            .clone()
            .ok_or_else(|| {
                ConfigError::validation_error(
                    "watching the matrix requires authorization.matrix_path",
                )
                .into()
            })
    }

    /// Routes `request` to its operation's pipeline and runs `handler` if
    /// the guard allows it.
    ///
    /// Unknown routes get a 404 envelope without running any guard.
    pub async fn handle<H>(&self, request: Request, handler: H) -> Response
    where
        H: FnOnce(&mut MiddlewareContext, Request) -> BoxFuture<'static, Response>
            + Send
            + 'static,
    {
        let pipeline = AdminOperation::resolve(request.method(), request.uri().path())
            .and_then(|operation| self.pipelines.get(&operation));
        match pipeline {
            Some(pipeline) => pipeline.process(MiddlewareContext::new(), request, handler).await.1,
            None => {
                debug!(
                    method = %request.method(),
                    path = %request.uri().path(),
                    "no admin operation"
                );
                Response::json_error(
                    StatusCode::NOT_FOUND,
                    &ErrorEnvelope::new("Endpoint not found"),
                )
            }
        }
    }

    /// The pipeline guarding `operation`.
    #[must_use]
    pub fn pipeline(&self, operation: AdminOperation) -> Option<&Pipeline> {
        self.pipelines.get(&operation)
    }

    /// The configuration the service was built from.
    #[must_use]
    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    /// The authorizer.
    #[must_use]
    pub fn authorizer(&self) -> &Arc<Authorizer> {
        &self.authorizer
    }

    /// The session store login handlers write to.
    #[must_use]
    pub fn sessions(&self) -> &Arc<InMemorySessionStore> {
        &self.sessions
    }

    /// The guard of every operation.
    #[must_use]
    pub fn catalog(&self) -> &GuardCatalog {
        &self.catalog
    }

    /// Returns `true` once [`start`](Self::start) succeeded.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Stops the watcher and waits for the audit log to drain.
    ///
    /// The audit log only drains once every clone of the authorizer is
    /// dropped; after [`AUDIT_DRAIN_TIMEOUT`] the writer is aborted.
    pub async fn shutdown(self) {
        let Self {
            authorizer,
            pipelines,
            audit_log,
            audit_task,
            matrix_watcher,
            ..
        } = self;

        if let Some(watcher) = matrix_watcher {
            watcher.abort();
        }
        drop(pipelines);
        drop(audit_log);
        drop(authorizer);

        if let Some(mut task) = audit_task {
            if tokio::time::timeout(AUDIT_DRAIN_TIMEOUT, &mut task).await.is_err() {
                warn!("audit log did not drain in time");
                task.abort();
            }
        }
        info!("admin authorization stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_authz::{LoginMethod, Permission, PermissionMatrix};
    use atlas_config::{AuthorizationConfig, SessionConfig};
    use atlas_core::{IdentityContext, ProfileSnapshot, Role, UserId};
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};

    fn in_memory_config() -> AtlasConfig {
        AtlasConfig::builder()
            .authorization(AuthorizationConfig {
                matrix_path: None,
                watch_matrix_file: false,
                emit_metrics: false,
                ..AuthorizationConfig::default()
            })
            .build()
    }

    fn ok(_ctx: &mut MiddlewareContext, _req: Request) -> BoxFuture<'static, Response> {
        Box::pin(async { http::Response::new(Full::new(Bytes::from("ok"))) })
    }

    fn get(path: &str, cookie: Option<String>) -> Request {
        let mut builder = http::Request::builder().method("GET").uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = in_memory_config();
        config.service.name = String::new();
        assert!(matches!(
            AdminAuthService::from_config(&config),
            Err(AtlasError::Config(_))
        ));
    }

    #[test]
    fn test_one_pipeline_per_operation() {
        let service = AdminAuthService::from_config(&in_memory_config()).unwrap();
        assert_eq!(service.catalog().len(), AdminOperation::ALL.len());
        for operation in AdminOperation::ALL {
            let pipeline = service.pipeline(*operation).unwrap();
            assert_eq!(pipeline.stage_names(), ["request_id", "tracing", "session", "guard"]);
        }
        assert!(!service.is_started());
    }

    #[tokio::test]
    async fn test_start_materializes_default_once() {
        let mut service = AdminAuthService::from_config(&in_memory_config()).unwrap();

        let live = service.start().await.unwrap().unwrap();
        assert_eq!(live.matrix(), &PermissionMatrix::default_matrix());
        assert!(service.is_started());
        assert!(matches!(service.start().await, Err(AtlasError::AlreadyStarted)));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_handle_routes_and_guards() {
        let mut service = AdminAuthService::from_config(&in_memory_config()).unwrap();
        service.start().await.unwrap();
        let identity = IdentityContext::new(
            UserId::new("u-7").unwrap(),
            Role::Support,
            ProfileSnapshot::new("noor"),
        );
        let token = service.sessions().login(&identity, LoginMethod::Password);
        let cookie = Some(format!("connect.sid={}", token.as_str()));

        let chat = service.handle(get("/api/chat/logs", cookie.clone()), ok).await;
        assert_eq!(chat.status(), StatusCode::OK);

        let backups = service.handle(get("/api/backup", cookie), ok).await;
        assert_eq!(backups.status(), StatusCode::FORBIDDEN);

        let missing = service.handle(get("/api/nowhere", None), ok).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let body = missing.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["message"], "Endpoint not found");
    }

    #[tokio::test]
    async fn test_custom_session_names() {
        let mut config = in_memory_config();
        config.session = SessionConfig {
            cookie_name: "atlas.sid".into(),
            header_name: "x-atlas-session".into(),
        };
        let mut service = AdminAuthService::from_config(&config).unwrap();
        service.start().await.unwrap();
        let identity = IdentityContext::new(
            UserId::new("u-1").unwrap(),
            Role::Admin,
            ProfileSnapshot::new("root"),
        );
        let token = service.sessions().login(&identity, LoginMethod::Password);

        let by_default_cookie = service
            .handle(get("/api/users", Some(format!("connect.sid={}", token.as_str()))), ok)
            .await;
        assert_eq!(by_default_cookie.status(), StatusCode::UNAUTHORIZED);

        let by_custom_cookie = service
            .handle(get("/api/users", Some(format!("atlas.sid={}", token.as_str()))), ok)
            .await;
        assert_eq!(by_custom_cookie.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_watcher_requires_matrix_path() {
        let service = AdminAuthService::from_config(&in_memory_config()).unwrap();
        assert!(matches!(
            service.spawn_matrix_watcher().await,
            Err(AtlasError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_guard_uses_operation_name() {
        let mut service = AdminAuthService::from_config(&in_memory_config()).unwrap();
        service.start().await.unwrap();
        let support = IdentityContext::new(
            UserId::new("u-2").unwrap(),
            Role::Support,
            ProfileSnapshot::new("noor"),
        );

        let err = service
            .authorizer()
            .replace_matrix(
                Some(&support),
                PermissionMatrix::new().with(Role::Support, Permission::CanManageRoles, true),
            )
            .await
            .unwrap_err();

        assert!(err.is_access_denied());
    }
}
