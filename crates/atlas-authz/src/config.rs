//! Configuration for the authorizer.

/// Authorizer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthzConfig {
    /// Store the default matrix on startup when none is stored.
    pub materialize_default_matrix: bool,
    /// Name of the guard that protects matrix replacement.
    pub replace_guard_name: String,
    /// Name of the guard that protects reading the matrix.
    pub read_guard_name: String,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            materialize_default_matrix: true,
            replace_guard_name: "config.permissions.replace".to_string(),
            read_guard_name: "config.permissions.read".to_string(),
        }
    }
}

impl AuthzConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable materializing the default matrix.
    #[must_use]
    pub fn with_materialize_default_matrix(mut self, enabled: bool) -> Self {
        self.materialize_default_matrix = enabled;
        self
    }

    /// Set the guard name used for matrix replacement.
    #[must_use]
    pub fn with_replace_guard_name(mut self, name: impl Into<String>) -> Self {
        self.replace_guard_name = name.into();
        self
    }

    /// Create a production configuration.
    ///
    /// The matrix must already exist in the store; a missing matrix keeps
    /// every non-admin permission check failing closed until an operator
    /// creates one.
    #[must_use]
    pub fn production() -> Self {
        Self {
            materialize_default_matrix: false,
            ..Self::default()
        }
    }

    /// Create a development configuration.
    #[must_use]
    pub fn development() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthzConfig::default();
        assert!(config.materialize_default_matrix);
        assert_eq!(config.replace_guard_name, "config.permissions.replace");
    }

    #[test]
    fn test_builder_pattern() {
        let config = AuthzConfig::new()
            .with_materialize_default_matrix(false)
            .with_replace_guard_name("roles.update");
        assert!(!config.materialize_default_matrix);
        assert_eq!(config.replace_guard_name, "roles.update");
    }

    #[test]
    fn test_presets() {
        assert!(!AuthzConfig::production().materialize_default_matrix);
        assert!(AuthzConfig::development().materialize_default_matrix);
    }
}
