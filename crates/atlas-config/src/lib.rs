//! Typed configuration for the Atlas admin authorization service.
//!
//! - TOML and JSON configuration files
//! - `.env` files and `ATLAS__SECTION__KEY` environment overrides
//! - Strict parsing (unknown fields are rejected)
//! - A debounced [`FileWatcher`] for hot-reloading the permission matrix
//!
//! # Example
//!
//! ```no_run
//! use atlas_config::ConfigLoader;
//!
//! # fn main() -> Result<(), atlas_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("atlas.toml")?
//!     .with_dotenv()
//!     .with_env_prefix("ATLAS")
//!     .load()?;
//!
//! println!("listening on {}", config.service.http_addr);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [service]
//! name = "atlas-admin"
//! environment = "production"
//! http_addr = "0.0.0.0:8080"
//!
//! [telemetry.logging]
//! level = "info"
//! format = "json"
//!
//! [telemetry.metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//!
//! [authorization]
//! matrix_path = "/var/lib/atlas/permissions.json"
//! materialize_default_matrix = false
//! watch_matrix_file = true
//! watch_debounce_ms = 250
//! audit_channel_capacity = 1024
//! audit_log_path = "/var/log/atlas/audit.jsonl"
//!
//! [session]
//! cookie_name = "connect.sid"
//! header_name = "x-session-token"
//! ```

#![doc(html_root_url = "https://docs.rs/atlas-config/0.1.0")]

mod config;
mod error;
mod loader;
mod schema;
mod watcher;

pub use config::{AtlasConfig, AtlasConfigBuilder};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{
    AuthorizationConfig, LogFormat, LoggingConfig, MetricsConfig, ServiceConfig, SessionConfig,
    TelemetrySection,
};
pub use watcher::{
    FileChangeEvent, FileChangeKind, FileWatcher, FileWatcherBuilder, FileWatcherConfig,
};
