//! The configuration store that owns the durable permission matrix.
//!
//! The authorization core never invents a matrix. A default is materialized
//! only by [`MatrixStore::load_or_init`], which writes it to the store on
//! first access, the same way every other configuration document is created.

use std::path::{Path, PathBuf};

use atlas_core::CollaboratorError;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::matrix::PermissionMatrix;
use crate::BoxFuture;

const COLLABORATOR: &str = "configuration store";

/// Durable storage for the permission matrix.
pub trait MatrixStore: Send + Sync {
    /// Loads the stored matrix, or `None` if none has been stored.
    fn load(&self) -> BoxFuture<'_, Result<Option<PermissionMatrix>, CollaboratorError>>;

    /// Replaces the stored matrix as a whole.
    fn replace(&self, matrix: PermissionMatrix) -> BoxFuture<'_, Result<(), CollaboratorError>>;

    /// Loads the stored matrix, storing `default` first if none exists.
    fn load_or_init(
        &self,
        default: PermissionMatrix,
    ) -> BoxFuture<'_, Result<PermissionMatrix, CollaboratorError>> {
        Box::pin(async move {
            if let Some(matrix) = self.load().await? {
                return Ok(matrix);
            }
            info!("no permission matrix stored, materializing default");
            self.replace(default.clone()).await?;
            Ok(default)
        })
    }
}

/// A store held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMatrixStore {
    matrix: Mutex<Option<PermissionMatrix>>,
    offline: Mutex<bool>,
}

impl InMemoryMatrixStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `matrix`.
    #[must_use]
    pub fn with_matrix(matrix: PermissionMatrix) -> Self {
        Self {
            matrix: Mutex::new(Some(matrix)),
            offline: Mutex::new(false),
        }
    }

    /// Makes every subsequent call fail until set back to `false`.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    /// Returns the stored matrix without going through the trait.
    #[must_use]
    pub fn stored(&self) -> Option<PermissionMatrix> {
        self.matrix.lock().clone()
    }

    fn check_online(&self) -> Result<(), CollaboratorError> {
        if *self.offline.lock() {
            return Err(CollaboratorError::new(COLLABORATOR, "store is offline"));
        }
        Ok(())
    }
}

impl MatrixStore for InMemoryMatrixStore {
    fn load(&self) -> BoxFuture<'_, Result<Option<PermissionMatrix>, CollaboratorError>> {
        Box::pin(async move {
            self.check_online()?;
            Ok(self.matrix.lock().clone())
        })
    }

    fn replace(&self, matrix: PermissionMatrix) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        Box::pin(async move {
            self.check_online()?;
            *self.matrix.lock() = Some(matrix);
            Ok(())
        })
    }
}

/// A JSON document on disk.
///
/// The document has the shape `{ "<role>": { "<permission>": bool } }` and
/// may be edited by hand; unknown keys are skipped with a warning when it is
/// read. Writes go to a sibling temp file that is then renamed over the
/// document, so readers never see a half-written file.
#[derive(Debug, Clone)]
pub struct FileMatrixStore {
    path: PathBuf,
}

impl FileMatrixStore {
    /// Creates a store backed by `path`. The file need not exist.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read(&self) -> Result<Option<PermissionMatrix>, CollaboratorError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "permission matrix file not found");
                return Ok(None);
            }
            Err(err) => {
                return Err(CollaboratorError::with_source(
                    COLLABORATOR,
                    format!("failed to read {}", self.path.display()),
                    err,
                ))
            }
        };

        let value: Value = serde_json::from_slice(&bytes).map_err(|err| {
            CollaboratorError::with_source(
                COLLABORATOR,
                format!("{} is not valid JSON", self.path.display()),
                err,
            )
        })?;

        PermissionMatrix::from_json(&value)
            .map(Some)
            .map_err(|err| {
                CollaboratorError::new(COLLABORATOR, format!("{}: {err}", self.path.display()))
            })
    }

    async fn write(&self, matrix: &PermissionMatrix) -> Result<(), CollaboratorError> {
        let io_err = |err: std::io::Error| {
            CollaboratorError::with_source(
                COLLABORATOR,
                format!("failed to write {}", self.path.display()),
                err,
            )
        };

        let mut bytes = serde_json::to_vec_pretty(matrix).map_err(|err| {
            CollaboratorError::with_source(COLLABORATOR, "failed to serialize matrix", err)
        })?;
        bytes.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let temp = self.temp_path();
        tokio::fs::write(&temp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&temp, &self.path).await.map_err(io_err)?;

        info!(path = %self.path.display(), "permission matrix written");
        Ok(())
    }
}

impl MatrixStore for FileMatrixStore {
    fn load(&self) -> BoxFuture<'_, Result<Option<PermissionMatrix>, CollaboratorError>> {
        Box::pin(self.read())
    }

    fn replace(&self, matrix: PermissionMatrix) -> BoxFuture<'_, Result<(), CollaboratorError>> {
        Box::pin(async move { self.write(&matrix).await })
    }
}
