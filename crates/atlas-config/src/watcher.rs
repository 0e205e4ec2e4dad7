//! File watching for hot-reload of externally edited documents.
//!
//! The permission matrix file may be edited by hand or replaced by another
//! process. [`FileWatcher`] turns the raw `notify` event stream into one
//! [`FileChangeEvent`] per burst of changes: after the first matching event
//! it waits until the file has been quiet for the debounce window, so a
//! reload never reads a half-written document.
//!
//! A single file is watched through its parent directory. Editors and the
//! matrix store replace files by renaming a temp file over them, which a
//! watch on the file itself would not survive.
//!
//! # Example
//!
//! ```no_run
//! use atlas_config::FileWatcher;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), atlas_config::ConfigError> {
//! let mut watcher = FileWatcher::new()
//!     .with_debounce(Duration::from_millis(250))
//!     .watch_file("config/permissions.json")?
//!     .build()?;
//!
//! while let Some(event) = watcher.next().await {
//!     println!("{} changed", event.path.display());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ConfigError;

/// A debounced change to a watched file.
#[derive(Debug, Clone)]
pub struct FileChangeEvent {
    /// Path to the changed file.
    pub path: PathBuf,
    /// Kind of the last change in the burst.
    pub kind: FileChangeKind,
    /// When the burst settled.
    pub timestamp: Instant,
}

/// Kind of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// File was created.
    Created,
    /// File was modified.
    Modified,
    /// File was deleted.
    Deleted,
    /// File was renamed into or out of place.
    Renamed,
}

impl FileChangeKind {
    fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Renamed),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Deleted),
            EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
        }
    }
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct FileWatcherConfig {
    /// Paths handed to the OS watcher (files or directories).
    pub paths: Vec<PathBuf>,
    /// Quiet period that ends a burst of changes.
    pub debounce: Duration,
    /// Whether to watch directories recursively.
    pub recursive: bool,
    /// File extensions to report (empty = all).
    pub extensions: HashSet<String>,
    /// File names to report (empty = all).
    pub file_names: HashSet<OsString>,
}

impl Default for FileWatcherConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce: Duration::from_millis(250),
            recursive: false,
            extensions: HashSet::new(),
            file_names: HashSet::new(),
        }
    }
}

impl FileWatcherConfig {
    fn accepts(&self, path: &Path) -> bool {
        if !self.file_names.is_empty()
            && !path
                .file_name()
                .is_some_and(|name| self.file_names.contains(name))
        {
            return false;
        }
        if !self.extensions.is_empty()
            && !path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| self.extensions.contains(ext))
        {
            return false;
        }
        true
    }

    /// Returns the first accepted path of a relevant event.
    fn select(&self, event: &Event) -> Option<(PathBuf, FileChangeKind)> {
        let kind = FileChangeKind::from_event(&event.kind)?;
        let path = event.paths.iter().find(|p| self.accepts(p))?;
        Some((path.clone(), kind))
    }
}

/// Builder for creating a [`FileWatcher`].
#[derive(Debug, Default)]
pub struct FileWatcherBuilder {
    config: FileWatcherConfig,
}

impl FileWatcherBuilder {
    /// Create a new file watcher builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the debounce window. Default is 250ms.
    #[must_use]
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.config.debounce = duration;
        self
    }

    /// Add a file or directory to watch.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist.
    pub fn watch_path<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::watch(format!(
                "path does not exist: {}",
                path.display()
            )));
        }
        self.config.paths.push(path.to_path_buf());
        Ok(self)
    }

    /// Watch a single file through its parent directory.
    ///
    /// The file itself need not exist yet; its directory must.
    ///
    /// # Errors
    ///
    /// Returns an error if the path has no file name or its directory does
    /// not exist.
    pub fn watch_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .ok_or_else(|| ConfigError::watch(format!("not a file path: {}", path.display())))?;
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        self.config.file_names.insert(name.to_os_string());
        self.watch_path(parent)
    }

    /// Set whether to watch directories recursively. Default is false.
    #[must_use]
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.config.recursive = recursive;
        self
    }

    /// Only report files with these extensions.
    #[must_use]
    pub fn watch_extensions(mut self, extensions: &[&str]) -> Self {
        self.config.extensions = extensions.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Build the file watcher and start receiving OS events.
    ///
    /// # Errors
    ///
    /// Returns an error if no paths are configured or the OS watcher cannot
    /// be created.
    pub fn build(self) -> Result<FileWatcher, ConfigError> {
        if self.config.paths.is_empty() {
            return Err(ConfigError::watch("no paths configured"));
        }

        let (tx, rx) = mpsc::channel(128);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // The receiver is gone once the watcher is dropped.
                let _ = tx.blocking_send(event);
            }
            Err(err) => warn!(error = %err, "file watcher error"),
        })
        .map_err(|e| ConfigError::watch(format!("failed to create file watcher: {e}")))?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for path in &self.config.paths {
            watcher.watch(path, mode).map_err(|e| {
                ConfigError::watch(format!("failed to watch {}: {e}", path.display()))
            })?;
            debug!(path = %path.display(), "watching");
        }

        Ok(FileWatcher {
            _watcher: watcher,
            rx,
            config: self.config,
        })
    }
}

/// Debounced file watcher.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    config: FileWatcherConfig,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Create a new file watcher builder.
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new() -> FileWatcherBuilder {
        FileWatcherBuilder::new()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &FileWatcherConfig {
        &self.config
    }

    /// Wait for the next burst of changes to settle.
    ///
    /// Returns `None` once the OS watcher has shut down.
    pub async fn next(&mut self) -> Option<FileChangeEvent> {
        let (mut path, mut kind) = loop {
            let event = self.rx.recv().await?;
            if let Some(selected) = self.config.select(&event) {
                break selected;
            }
        };

        // Extend the burst while events keep arriving inside the window.
        loop {
            match tokio::time::timeout(self.config.debounce, self.rx.recv()).await {
                Ok(Some(event)) => {
                    if let Some((p, k)) = self.config.select(&event) {
                        path = p;
                        kind = k;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        Some(FileChangeEvent {
            path,
            kind,
            timestamp: Instant::now(),
        })
    }
}
