//! Layered configuration loading.
//!
//! Layers apply in order, each overriding the previous one:
//! 1. Built-in defaults or a preset
//! 2. A TOML or JSON file
//! 3. A `.env` file, read into the process environment
//! 4. `PREFIX__SECTION__KEY` environment variables
//!
//! The result is validated before it is returned.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{AtlasConfig, ConfigError, LogFormat};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "ATLAS";

/// Configuration loader with layered approach.
///
/// # Example
///
/// ```no_run
/// use atlas_config::ConfigLoader;
///
/// # fn main() -> Result<(), atlas_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_optional_file("atlas.toml")?
///     .with_dotenv()
///     .with_env_prefix("ATLAS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: AtlasConfig,
    env_prefix: Option<String>,
    source: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader starting from default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AtlasConfig::default(),
            env_prefix: None,
            source: None,
        }
    }

    /// Start from the development preset.
    ///
    /// # Example
    ///
    /// ```
    /// use atlas_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.telemetry.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = AtlasConfig::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = AtlasConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format follows the extension: `.toml` or `.json`. Sections absent
    /// from the file keep their defaults; sections present replace the
    /// current section as a whole.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is missing, unreadable, malformed,
    /// or contains unknown fields.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        self.merge_str(&content, &format).map_err(|err| match err {
            ConfigError::ValidationError(_) => ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            )),
            other => other,
        })?;
        self.source = Some(path.to_path_buf());
        debug!(path = %path.display(), "configuration file loaded");

        Ok(self)
    }

    /// Load a file if it exists; otherwise keep the current values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format ("toml" or "json").
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    ///
    /// # Example
    ///
    /// ```
    /// use atlas_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string("[session]\ncookie_name = \"atlas.sid\"", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.session.cookie_name, "atlas.sid");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.merge_str(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Set the prefix for environment overrides.
    ///
    /// Variables use the form `PREFIX__SECTION__KEY`, for example
    /// `ATLAS__AUTHORIZATION__MATRIX_PATH=/var/lib/atlas/permissions.json`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Read a `.env` file from the working directory into the environment.
    ///
    /// A missing file is not an error.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), ".env loaded"),
            Err(err) if err.not_found() => {}
            Err(err) => warn!(error = %err, "failed to read .env"),
        }
        self
    }

    /// Path of the file that was loaded, if any.
    #[must_use]
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation
    /// fails.
    pub fn load(mut self) -> Result<AtlasConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: BTreeMap<String, String> = env::vars()
                .filter(|(k, _)| k.starts_with(&prefix))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Return the configuration without overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> AtlasConfig {
        self.config
    }

    fn merge_str(&mut self, content: &str, format: &str) -> Result<(), ConfigError> {
        let table: serde_json::Map<String, serde_json::Value> = match format {
            "toml" => {
                let value: toml::Value = toml::from_str(content)?;
                serde_json::to_value(value)?
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
            }
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };

        // Merge at section granularity so a file naming one section keeps
        // the preset's values for the others.
        let mut current = match serde_json::to_value(&self.config)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (section, value) in table {
            current.insert(section, value);
        }
        self.config = serde_json::from_value(serde_json::Value::Object(current))?;
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let rest = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;
        let parts: Vec<&str> = rest.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            ["SERVICE", "NAME"] => config.service.name = value.to_string(),
            ["SERVICE", "ENVIRONMENT"] => config.service.environment = value.to_string(),
            ["SERVICE", "HTTP_ADDR"] => config.service.http_addr = value.to_string(),

            ["TELEMETRY", "LOGGING", "ENABLED"] => {
                config.telemetry.logging.enabled = parse_bool_var(key, value)?;
            }
            ["TELEMETRY", "LOGGING", "LEVEL"] => {
                config.telemetry.logging.level = value.to_string();
            }
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                config.telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "INCLUDE_LOCATION"] => {
                config.telemetry.logging.include_location = parse_bool_var(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ENABLED"] => {
                config.telemetry.metrics.enabled = parse_bool_var(key, value)?;
            }
            ["TELEMETRY", "METRICS", "ADDR"] => {
                config.telemetry.metrics.addr = value.to_string();
            }

            ["AUTHORIZATION", "MATRIX_PATH"] => {
                config.authorization.matrix_path = optional_path(value);
            }
            ["AUTHORIZATION", "MATERIALIZE_DEFAULT_MATRIX"] => {
                config.authorization.materialize_default_matrix = parse_bool_var(key, value)?;
            }
            ["AUTHORIZATION", "WATCH_MATRIX_FILE"] => {
                config.authorization.watch_matrix_file = parse_bool_var(key, value)?;
            }
            ["AUTHORIZATION", "WATCH_DEBOUNCE_MS"] => {
                config.authorization.watch_debounce_ms = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }
            ["AUTHORIZATION", "AUDIT_CHANNEL_CAPACITY"] => {
                config.authorization.audit_channel_capacity = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }
            ["AUTHORIZATION", "AUDIT_LOG_PATH"] => {
                config.authorization.audit_log_path = optional_path(value);
            }
            ["AUTHORIZATION", "EMIT_METRICS"] => {
                config.authorization.emit_metrics = parse_bool_var(key, value)?;
            }

            ["SESSION", "COOKIE_NAME"] => config.session.cookie_name = value.to_string(),
            ["SESSION", "HEADER_NAME"] => config.session.header_name = value.to_string(),

            _ => debug!(var = key, "ignoring unknown configuration variable"),
        }

        Ok(())
    }
}

fn optional_path(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, AtlasConfig::default());
    }

    #[test]
    fn test_loader_with_production() {
        let config = ConfigLoader::new().with_production().load().unwrap();
        assert_eq!(config.telemetry.logging.format, LogFormat::Json);
        assert!(!config.authorization.materialize_default_matrix);
    }

    #[test]
    fn test_file_section_keeps_preset_for_other_sections() {
        let config = ConfigLoader::new()
            .with_production()
            .with_string("[session]\ncookie_name = \"atlas.sid\"", "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.session.cookie_name, "atlas.sid");
        assert_eq!(config.service.environment, "production");
        assert!(config.telemetry.metrics.enabled);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"authorization": {
            "matrix_path": "/srv/atlas/permissions.json",
            "watch_debounce_ms": 50
        }}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(
            config.authorization.matrix_path,
            Some(PathBuf::from("/srv/atlas/permissions.json"))
        );
        assert_eq!(config.authorization.watch_debounce_ms, 50);
        assert_eq!(config.authorization.audit_channel_capacity, 1024);
    }

    #[test]
    fn test_unknown_field_in_file_rejected() {
        let result = ConfigLoader::new().with_string("[authorization]\nmode = \"rbac\"", "toml");
        assert!(matches!(result, Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_unsupported_format() {
        let result = ConfigLoader::new().with_string("a: b", "yaml");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atlas.toml");
        fs::write(&path, "[service]\nhttp_addr = \"127.0.0.1:7000\"\n").unwrap();

        let loader = ConfigLoader::new().with_file(&path).unwrap();
        assert_eq!(loader.source(), Some(path.as_path()));
        let config = loader.load().unwrap();
        assert_eq!(config.service.http_addr, "127.0.0.1:7000");
    }

    #[test]
    fn test_with_file_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atlas.ini");
        fs::write(&path, "x=1").unwrap();

        let err = ConfigLoader::new().with_file(&path).unwrap_err();
        assert!(err.to_string().contains("atlas.ini"));
    }

    #[test]
    fn test_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/atlas.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/atlas.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.service.http_addr, "0.0.0.0:8080");
    }

    #[test]
    fn test_invalid_value_fails_load() {
        let result = ConfigLoader::new()
            .with_string("[service]\nhttp_addr = \"nowhere\"", "toml")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    // Overrides are exercised through apply_env_var rather than set_var so
    // parallel tests never race on the process environment.

    #[test]
    fn test_apply_env_var_authorization() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("T__AUTHORIZATION__MATRIX_PATH", "/etc/atlas/m.json", "T")
            .unwrap();
        loader
            .apply_env_var("T__AUTHORIZATION__MATERIALIZE_DEFAULT_MATRIX", "false", "T")
            .unwrap();
        loader
            .apply_env_var("T__AUTHORIZATION__AUDIT_CHANNEL_CAPACITY", "64", "T")
            .unwrap();

        let authz = &loader.config.authorization;
        assert_eq!(authz.matrix_path, Some(PathBuf::from("/etc/atlas/m.json")));
        assert!(!authz.materialize_default_matrix);
        assert_eq!(authz.audit_channel_capacity, 64);
    }

    #[test]
    fn test_apply_env_var_empty_path_clears() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("T__AUTHORIZATION__MATRIX_PATH", "", "T")
            .unwrap();
        assert!(loader.config.authorization.matrix_path.is_none());
    }

    #[test]
    fn test_apply_env_var_telemetry_and_session() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("T__TELEMETRY__LOGGING__FORMAT", "pretty", "T")
            .unwrap();
        loader
            .apply_env_var("T__SESSION__COOKIE_NAME", "atlas.sid", "T")
            .unwrap();
        assert_eq!(loader.config.telemetry.logging.format, LogFormat::Pretty);
        assert_eq!(loader.config.session.cookie_name, "atlas.sid");
    }

    #[test]
    fn test_apply_env_var_parse_errors() {
        let mut loader = ConfigLoader::new();
        assert!(loader
            .apply_env_var("T__AUTHORIZATION__WATCH_DEBOUNCE_MS", "soon", "T")
            .is_err());
        assert!(loader
            .apply_env_var("T__TELEMETRY__METRICS__ENABLED", "maybe", "T")
            .is_err());
        assert!(loader
            .apply_env_var("T__TELEMETRY__LOGGING__FORMAT", "xml", "T")
            .is_err());
        assert!(loader.apply_env_var("TSERVICE", "x", "T").is_err());
    }

    #[test]
    fn test_apply_env_var_unknown_key_ignored() {
        let mut loader = ConfigLoader::new();
        loader.apply_env_var("T__SERVER__HTTP2", "true", "T").unwrap();
        assert_eq!(loader.config, AtlasConfig::default());
    }
}
