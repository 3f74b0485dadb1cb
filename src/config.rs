use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::ShelfError;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "shelfmark.json";
pub const DEFAULT_ISBNDB_BASE: &str = "https://isbndb.com/api/v2/json";
pub const API_KEY_ENV: &str = "ISBNDB_API_KEY";

const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 200;
const MAX_ATTEMPTS_CEILING: u32 = 5;
const MAX_LOOKUP_TIMEOUT_SECS: u64 = 300;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;
const MAX_BASE_DELAY_MS: u64 = 10_000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub isbndb: IsbndbSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IsbndbSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DatabaseSection {
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetrySection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct IsbndbSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub isbndb: IsbndbSettings,
    pub database_path: Utf8PathBuf,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `shelfmark.json` in the working directory when no path
    /// is given. A missing default file yields the built-in defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ShelfError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            if path.is_some() {
                return Err(ShelfError::MissingConfig(config_path));
            }
            return Self::resolve_config(Config::default(), std::env::var(API_KEY_ENV).ok());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| ShelfError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ShelfError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config, std::env::var(API_KEY_ENV).ok())
    }

    /// Applies defaults and the environment api key override.
    pub fn resolve_config(
        config: Config,
        env_api_key: Option<String>,
    ) -> Result<ResolvedConfig, ShelfError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let base_url = config
            .isbndb
            .base_url
            .map(|url| url.trim().to_string())
            .unwrap_or_else(|| DEFAULT_ISBNDB_BASE.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ShelfError::InvalidConfig(format!(
                "isbndb.base_url must be an http(s) URL: {base_url}"
            )));
        }

        let api_key = env_api_key
            .or(config.isbndb.api_key)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let timeout_secs = config
            .isbndb
            .timeout_secs
            .unwrap_or(DEFAULT_LOOKUP_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ShelfError::InvalidConfig(
                "isbndb.timeout_secs must be positive".to_string(),
            ));
        }
        let timeout_secs = timeout_secs.min(MAX_LOOKUP_TIMEOUT_SECS);

        let database_path = match config.database.path {
            Some(path) => Utf8PathBuf::from(path),
            None => default_database_path()?,
        };

        let max_attempts = config
            .retry
            .max_attempts
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .clamp(1, MAX_ATTEMPTS_CEILING);
        let base_delay = Duration::from_millis(
            config
                .retry
                .base_delay_ms
                .unwrap_or(DEFAULT_BASE_DELAY_MS)
                .min(MAX_BASE_DELAY_MS),
        );
        let request_timeout_secs = config
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS)
            .clamp(1, MAX_REQUEST_TIMEOUT_SECS);

        Ok(ResolvedConfig {
            schema_version,
            isbndb: IsbndbSettings {
                base_url,
                api_key,
                timeout: Duration::from_secs(timeout_secs),
            },
            database_path,
            retry: RetryPolicy::new(max_attempts, base_delay),
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }
}

pub fn default_database_path() -> Result<Utf8PathBuf, ShelfError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_dir().join("shelfmark").join("shelfmark.db")).ok()
        })
        .ok_or_else(|| ShelfError::InvalidConfig("unable to resolve data directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = Config {
            database: DatabaseSection {
                path: Some("/tmp/shelf.db".to_string()),
            },
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config, None).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.isbndb.base_url, DEFAULT_ISBNDB_BASE);
        assert_eq!(resolved.isbndb.timeout, Duration::from_secs(30));
        assert_eq!(resolved.isbndb.api_key, None);
        assert_eq!(resolved.retry.max_attempts(), 3);
        assert_eq!(resolved.database_path, Utf8PathBuf::from("/tmp/shelf.db"));
    }
}
