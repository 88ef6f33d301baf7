//! Configuration for rollup registration and loading.
//!
//! Settings are plain data threaded explicitly through [`crate::api::RollupManager`];
//! nothing is read from ambient or session state. A config can be built in
//! code (`RollupConfig::default()`) or loaded from TOML:
//!
//! ```toml
//! placeholder_column = "__rollup_placeholder"
//! time_bucket_function = "timeseries"
//! rollup_from_ancestor = true
//! load_on_create = true
//! drop_on_failed_load = true
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::RollupError;

/// Default name of the invisible placeholder measure.
pub const DEFAULT_PLACEHOLDER_COLUMN: &str = "__rollup_placeholder";

/// Default name of the time-bucketing function.
pub const DEFAULT_TIME_BUCKET_FUNCTION: &str = "timeseries";

/// Settings for a [`crate::api::RollupManager`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RollupConfig {
    /// Name of the invisible measure appended to every child schema.
    ///
    /// The column exists so a child table always has at least one measure;
    /// it never takes part in derivation or query generation.
    pub placeholder_column: String,

    /// Function used to bucket timestamps, both when recognising
    /// time-bucket expressions in plans and when emitting load SQL.
    pub time_bucket_function: String,

    /// Whether time-bucketed rollups may be loaded from a finer sibling
    /// rollup instead of the base table.
    pub rollup_from_ancestor: bool,

    /// Whether `create_rollup` runs the initial load right after registration.
    pub load_on_create: bool,

    /// Whether a failed initial load unregisters the freshly created child.
    pub drop_on_failed_load: bool,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            placeholder_column: DEFAULT_PLACEHOLDER_COLUMN.to_string(),
            time_bucket_function: DEFAULT_TIME_BUCKET_FUNCTION.to_string(),
            rollup_from_ancestor: true,
            load_on_create: true,
            drop_on_failed_load: true,
        }
    }
}

impl RollupConfig {
    /// Parse a configuration from a TOML document. Missing keys keep their
    /// defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, RollupError> {
        let config: Self =
            toml::from_str(content).map_err(|e| RollupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, RollupError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| RollupError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Check that configured names are usable as SQL identifiers.
    pub fn validate(&self) -> Result<(), RollupError> {
        for (key, value) in [
            ("placeholder_column", &self.placeholder_column),
            ("time_bucket_function", &self.time_bucket_function),
        ] {
            if !is_plain_identifier(value) {
                return Err(RollupError::Config(format!(
                    "{key} must be a non-empty identifier, got {value:?}"
                )));
            }
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RollupConfig::default();
        assert_eq!(config.placeholder_column, "__rollup_placeholder");
        assert_eq!(config.time_bucket_function, "timeseries");
        assert!(config.rollup_from_ancestor);
        assert!(config.load_on_create);
        assert!(config.drop_on_failed_load);
    }

    #[test]
    fn test_empty_toml_keeps_defaults() {
        let config = RollupConfig::from_toml_str("").unwrap();
        assert_eq!(config, RollupConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = RollupConfig::from_toml_str(
            "rollup_from_ancestor = false\ntime_bucket_function = \"date_bucket\"\n",
        )
        .unwrap();
        assert!(!config.rollup_from_ancestor);
        assert_eq!(config.time_bucket_function, "date_bucket");
        assert_eq!(config.placeholder_column, DEFAULT_PLACEHOLDER_COLUMN);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RollupConfig::from_toml_str("lod_on_create = true").unwrap_err();
        assert!(matches!(err, RollupError::Config(_)));
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let err = RollupConfig::from_toml_str("placeholder_column = \"bad name\"").unwrap_err();
        assert!(err.to_string().contains("placeholder_column"));

        let err = RollupConfig::from_toml_str("time_bucket_function = \"\"").unwrap_err();
        assert!(err.to_string().contains("time_bucket_function"));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = RollupConfig::load_from("/nonexistent/rollup.toml").unwrap_err();
        assert!(matches!(err, RollupError::Config(_)));
    }
}
