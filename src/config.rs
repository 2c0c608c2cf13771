//! Configuration loading: connection credentials plus report options, read
//! from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::render::DEFAULT_TITLE;
use crate::table::{default_sequence_columns, Column};

/// Section holding the connection parameters.
pub const API_SECTION: &str = "SHOTGRID_API";
/// Keys that must be present under [`API_SECTION`].
pub const REQUIRED_FIELDS: [&str; 3] = ["SHOTGRID_URL", "SCRIPT_NAME", "API_KEY"];

pub const DEFAULT_CONFIG_PATH: &str = "conf.json";

/// Upper bound for `max_retries`; backoff doubles per attempt.
pub const MAX_RETRIES_LIMIT: u32 = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("The '{0}' section is missing from your config file.")]
    MissingSection(String),

    #[error("The '{field}' field under the {section} section is missing from your config file.")]
    MissingField { section: String, field: String },

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

/// Connection parameters for the tracking database.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    #[serde(rename = "SHOTGRID_URL")]
    pub url: String,
    #[serde(rename = "SCRIPT_NAME")]
    pub script_name: String,
    #[serde(rename = "API_KEY")]
    pub api_key: String,
}

// Keeps the key out of logs.
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("script_name", &self.script_name)
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppConfig {
    #[serde(rename = "SHOTGRID_API")]
    pub connection: ConnectionConfig,
    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for timeouts and connection failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_sequence_columns")]
    pub columns: Vec<Column>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl AppConfig {
    /// Loads and validates a JSON config file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(ConfigError::NotFound(path_ref.to_path_buf()));
        }

        let content = fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
            path: path_ref.to_path_buf(),
            source,
        })?;

        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(content)?;
        Self::from_value(value)
    }

    /// Checks the required section and keys, then deserializes.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        validate(&value)?;
        let config: AppConfig = serde_json::from_value(value)?;
        if config.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if config.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid {
                key: "max_retries".to_string(),
                reason: format!("must be at most {}", MAX_RETRIES_LIMIT),
            });
        }
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Fails with a message naming the missing section or field.
pub fn validate(value: &Value) -> Result<(), ConfigError> {
    let section = value
        .get(API_SECTION)
        .and_then(Value::as_object)
        .ok_or_else(|| ConfigError::MissingSection(API_SECTION.to_string()))?;

    for field in REQUIRED_FIELDS {
        let entry = section.get(field).ok_or_else(|| ConfigError::MissingField {
            section: API_SECTION.to_string(),
            field: field.to_string(),
        })?;
        match entry.as_str() {
            Some(s) if !s.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::Invalid {
                    key: format!("{}.{}", API_SECTION, field),
                    reason: "expected a non-empty string".to_string(),
                })
            }
        }
    }

    let url = section
        .get("SHOTGRID_URL")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            key: format!("{}.SHOTGRID_URL", API_SECTION),
            reason: format!("'{}' is not an http(s) URL", url),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnKind;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn valid_config() -> Value {
        json!({
            "SHOTGRID_API": {
                "SHOTGRID_URL": "https://studio.shotgrid.autodesk.com",
                "SCRIPT_NAME": "TESTSCRIPT",
                "API_KEY": "TESTAPIKEY"
            }
        })
    }

    #[test]
    fn test_load_valid_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf.json");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "{}", valid_config()).unwrap();

        let config = AppConfig::from_json_file(&path).unwrap();
        assert_eq!(config.connection.url, "https://studio.shotgrid.autodesk.com");
        assert_eq!(config.connection.script_name, "TESTSCRIPT");
        assert_eq!(config.connection.api_key, "TESTAPIKEY");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.title, DEFAULT_TITLE);
        assert_eq!(config.columns, default_sequence_columns());
    }

    #[test]
    fn test_optional_settings_and_columns() {
        let mut value = valid_config();
        value["timeout_secs"] = json!(5);
        value["max_retries"] = json!(0);
        value["columns"] = json!([
            {"label": "Code", "kind": "raw", "source": "code"},
            {"label": "Shots", "kind": "computed", "source": "sg_shot_count"}
        ]);

        let config = AppConfig::from_value(value).unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.columns.len(), 2);
        assert_eq!(config.columns[1].kind, ColumnKind::Computed);
    }

    #[test]
    fn test_retry_count_is_bounded() {
        let mut value = valid_config();
        value["max_retries"] = json!(MAX_RETRIES_LIMIT);
        assert_eq!(AppConfig::from_value(value.clone()).unwrap().max_retries, MAX_RETRIES_LIMIT);

        value["max_retries"] = json!(1000);
        let err = AppConfig::from_value(value).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "max_retries"));
        assert!(err.to_string().contains("at most 8"));
    }

    #[test]
    fn test_missing_section() {
        let err = AppConfig::from_value(json!({})).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection(ref s) if s == "SHOTGRID_API"));
        assert_eq!(
            err.to_string(),
            "The 'SHOTGRID_API' section is missing from your config file."
        );
    }

    #[test]
    fn test_missing_field() {
        let mut value = valid_config();
        value["SHOTGRID_API"].as_object_mut().unwrap().remove("SHOTGRID_URL");

        let err = AppConfig::from_value(value).unwrap_err();
        match err {
            ConfigError::MissingField { section, field } => {
                assert_eq!(section, "SHOTGRID_API");
                assert_eq!(field, "SHOTGRID_URL");
            }
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values() {
        let mut value = valid_config();
        value["SHOTGRID_API"]["API_KEY"] = json!("");
        assert!(matches!(AppConfig::from_value(value).unwrap_err(), ConfigError::Invalid { .. }));

        let mut value = valid_config();
        value["SHOTGRID_API"]["SHOTGRID_URL"] = json!("studio.shotgrid.autodesk.com");
        assert!(matches!(AppConfig::from_value(value).unwrap_err(), ConfigError::Invalid { .. }));

        let mut value = valid_config();
        value["timeout_secs"] = json!(0);
        assert!(matches!(AppConfig::from_value(value).unwrap_err(), ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_invalid_json_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf.json");
        fs::write(&path, "invalid json").unwrap();
        assert!(matches!(AppConfig::from_json_file(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = AppConfig::from_json_file("non_existent_file.json");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let config = AppConfig::from_value(valid_config()).unwrap();
        let debug = format!("{:?}", config.connection);
        assert!(!debug.contains("TESTAPIKEY"));
    }
}
