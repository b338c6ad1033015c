//! Configuration management
//!
//! Configuration is loaded from a `config.yml` file and can be overridden
//! with environment variables. Missing values are filled with defaults that
//! match the layout produced by the `prepare-data` and `train-model` tools.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Upload configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// Classifier artifact configuration
    #[serde(default)]
    pub model: ModelConfig,
    /// Session configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database driver (sqlite or mysql)
    #[serde(default)]
    pub driver: DatabaseDriver,
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: DatabaseDriver::default(),
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/tumorscan.db".to_string()
}

/// Database driver type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDriver {
    /// SQLite (default)
    #[default]
    Sqlite,
    /// MySQL
    Mysql,
}

impl DatabaseDriver {
    /// Infer the driver from a connection URL scheme.
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("mysql://") {
            DatabaseDriver::Mysql
        } else {
            DatabaseDriver::Sqlite
        }
    }

    /// Whether `url` names a database this driver can open.
    ///
    /// SQLite takes `sqlite:` URLs, `:memory:` and plain paths; MySQL takes
    /// `mysql://` URLs and scheme-less `user@host/db` strings.
    pub fn accepts_url(&self, url: &str) -> bool {
        match (self, url_scheme(url)) {
            (_, None) => true,
            (DatabaseDriver::Sqlite, Some(scheme)) => scheme == "sqlite",
            (DatabaseDriver::Mysql, Some(scheme)) => scheme == "mysql",
        }
    }
}

/// The scheme of a `scheme://...` or `sqlite:...` URL.
fn url_scheme(url: &str) -> Option<&str> {
    if url.starts_with("sqlite:") {
        return Some("sqlite");
    }
    let (scheme, _) = url.split_once("://")?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Directory where submitted images are stored
    #[serde(default = "default_upload_path")]
    pub path: PathBuf,
    /// Maximum request body size in bytes (default: 16MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            path: default_upload_path(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_upload_path() -> PathBuf {
    PathBuf::from("static/uploads")
}

fn default_max_file_size() -> u64 {
    16 * 1024 * 1024 // 16MB
}

/// Classifier artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path of the trained artifact (tar.gz)
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    /// Remote location to fetch the artifact from when it is missing
    #[serde(default)]
    pub download_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            download_url: None,
        }
    }
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/modelo_tumor_multiclase.tar.gz")
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session lifetime in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
    /// Drop every stored session when the server starts
    #[serde(default)]
    pub reset_sessions_on_start: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_days: default_session_days(),
            reset_sessions_on_start: false,
        }
    }
}

fn default_session_days() -> i64 {
    7
}

/// Upper bound for `auth.session_days`, ten years
pub const MAX_SESSION_DAYS: i64 = 3650;

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist or is empty, returns the default configuration.
    /// If the file exists but is invalid YAML, returns an error with the location.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Recognized variables:
    /// - DATABASE_URL (driver inferred from the scheme)
    /// - TUMORSCAN_SERVER_HOST
    /// - TUMORSCAN_SERVER_PORT
    /// - TUMORSCAN_DATABASE_DRIVER
    /// - TUMORSCAN_DATABASE_URL
    /// - TUMORSCAN_UPLOAD_PATH
    /// - TUMORSCAN_MODEL_PATH
    /// - TUMORSCAN_MODEL_DOWNLOAD_URL
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("TUMORSCAN_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("TUMORSCAN_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.driver = DatabaseDriver::from_url(&url);
            self.database.url = url;
        }
        if let Ok(driver) = std::env::var("TUMORSCAN_DATABASE_DRIVER") {
            match driver.to_lowercase().as_str() {
                "sqlite" => self.database.driver = DatabaseDriver::Sqlite,
                "mysql" => self.database.driver = DatabaseDriver::Mysql,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(url) = std::env::var("TUMORSCAN_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(path) = std::env::var("TUMORSCAN_UPLOAD_PATH") {
            self.upload.path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("TUMORSCAN_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("TUMORSCAN_MODEL_DOWNLOAD_URL") {
            self.model.download_url = if url.trim().is_empty() {
                None
            } else {
                Some(url)
            };
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_SESSION_DAYS).contains(&self.auth.session_days) {
            return Err(ConfigError::ValidationError(format!(
                "auth.session_days must be between 1 and {}, got {}",
                MAX_SESSION_DAYS, self.auth.session_days
            )));
        }
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database.url must not be empty".to_string(),
            ));
        }
        if !self.database.driver.accepts_url(&self.database.url) {
            return Err(ConfigError::ValidationError(format!(
                "database.url '{}' is not a {:?} database URL",
                self.database.url, self.database.driver
            )));
        }
        Ok(())
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches process environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_VARS: &[&str] = &[
    "DATABASE_URL",
    "TUMORSCAN_SERVER_HOST",
    "TUMORSCAN_SERVER_PORT",
    "TUMORSCAN_DATABASE_DRIVER",
    "TUMORSCAN_DATABASE_URL",
    "TUMORSCAN_UPLOAD_PATH",
    "TUMORSCAN_MODEL_PATH",
    "TUMORSCAN_MODEL_DOWNLOAD_URL",
];
