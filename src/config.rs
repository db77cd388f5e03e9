use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filter::DEFAULT_PAGE_SIZE;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8001/api";
const DEFAULT_RESOURCE_PATH: &str = "/documentation/resources";
const DEFAULT_DB_PATH: &str = "hidesync.db";

pub const ENV_API_URL: &str = "HIDESYNC_API_URL";
pub const ENV_DB_PATH: &str = "HIDESYNC_DB_PATH";
pub const ENV_API_TOKEN: &str = "HIDESYNC_API_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Settings for the offline cache and its remote collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub database_path: PathBuf,
    pub api_base_url: String,
    pub resource_path: String,
    pub default_page_size: u32,
    pub request_timeout_secs: u64,
    pub auth_token: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DB_PATH),
            api_base_url: DEFAULT_API_URL.to_string(),
            resource_path: DEFAULT_RESOURCE_PATH.to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            request_timeout_secs: 15,
            auth_token: None,
        }
    }
}

impl SyncConfig {
    /// Parse TOML; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Apply `HIDESYNC_*` environment overrides on top of `self`.
    pub fn with_env(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL) {
            self.api_base_url = url;
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(token) = lookup(ENV_API_TOKEN).filter(|t| !t.is_empty()) {
            self.auth_token = Some(token);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "api_base_url",
                message: "must not be empty".to_string(),
            });
        }
        if self.default_page_size == 0 {
            return Err(ConfigError::Invalid {
                field: "default_page_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Full URL of the resource collection, without a trailing slash.
    pub fn collection_url(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        let path = self.resource_path.trim_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{path}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.default_page_size, 20);
        assert_eq!(
            config.collection_url(),
            "http://127.0.0.1:8001/api/documentation/resources"
        );
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SyncConfig::from_toml_str(
            r#"
api_base_url = "https://workshop.example/api/"
default_page_size = 50
"#,
        )
        .unwrap();
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.request_timeout_secs, 15);
        assert_eq!(
            config.collection_url(),
            "https://workshop.example/api/documentation/resources"
        );
    }

    #[test]
    fn rejects_invalid_values() {
        assert_matches!(
            SyncConfig::from_toml_str("default_page_size = 0"),
            Err(ConfigError::Invalid { field: "default_page_size", .. })
        );
        assert_matches!(
            SyncConfig::from_toml_str("api_base_url = \"  \""),
            Err(ConfigError::Invalid { field: "api_base_url", .. })
        );
        assert_matches!(
            SyncConfig::from_toml_str("default_page_size = \"many\""),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_API_URL, "http://10.0.0.2/api"),
            (ENV_DB_PATH, "/tmp/cache.db"),
            (ENV_API_TOKEN, "secret"),
        ]);
        let config = SyncConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api_base_url, "http://10.0.0.2/api");
        assert_eq!(config.database_path, PathBuf::from("/tmp/cache.db"));
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "resource_path = \"/tools\"").unwrap();
        let config = SyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.collection_url(), "http://127.0.0.1:8001/api/tools");

        assert_matches!(
            SyncConfig::from_file("/nonexistent/hidesync.toml"),
            Err(ConfigError::Io { .. })
        );
    }
}
