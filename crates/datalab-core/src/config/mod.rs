mod database;
mod external;

pub use database::DatabaseConfig;
pub use external::{BrokerConfig, ServicesConfig, StorageConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{DatalabError, Result};

/// Prefix for environment variables naming sibling service URLs.
const SERVICE_ENV_PREFIX: &str = "DATALAB_SERVICE_";

/// Root configuration for datalab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatalabConfig {
    /// Project metadata.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Database configuration.
    pub database: DatabaseConfig,

    /// HTTP gateway configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Task-queue broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Object-storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sibling service discovery URLs.
    #[serde(default)]
    pub services: ServicesConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DatalabConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| DatalabError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| DatalabError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Build configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build configuration from an explicit set of environment variables.
    ///
    /// `DATABASE_URL` is required; everything else falls back to defaults.
    pub fn from_vars(vars: &[(String, String)]) -> Result<Self> {
        let get = |key: &str| {
            vars.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let url = get("DATABASE_URL").ok_or_else(|| {
            DatalabError::Config("Missing required env var: DATABASE_URL".to_string())
        })?;

        let mut config = Self::default_with_database_url(&url);

        if let Some(port) = get("DATALAB_PORT") {
            config.gateway.port = port
                .parse()
                .map_err(|_| DatalabError::Config(format!("Invalid DATALAB_PORT: {}", port)))?;
        }
        if let Some(v) = get("CELERY_BROKER_URL") {
            config.broker.broker_url = v;
        }
        if let Some(v) = get("CELERY_RESULT_BACKEND") {
            config.broker.result_backend = v;
        }
        if let Some(v) = get("MINIO_ENDPOINT") {
            config.storage.endpoint = v;
        }
        if let Some(v) = get("MINIO_ACCESS_KEY") {
            config.storage.access_key = v;
        }
        if let Some(v) = get("MINIO_SECRET_KEY") {
            config.storage.secret_key = v;
        }
        if let Some(v) = get("MINIO_BUCKET") {
            config.storage.bucket = v;
        }
        if let Some(v) = get("MINIO_SECURE") {
            config.storage.secure = matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES");
        }

        for (key, value) in vars {
            if let Some(name) = key.strip_prefix(SERVICE_ENV_PREFIX) {
                if !name.is_empty() {
                    config
                        .services
                        .urls
                        .insert(name.to_lowercase(), value.clone());
                }
            }
        }

        Ok(config)
    }

    /// Configuration with defaults everywhere except the database URL.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            project: ProjectConfig::default(),
            database: DatabaseConfig {
                url: url.to_string(),
                ..Default::default()
            },
            gateway: GatewayConfig::default(),
            broker: BrokerConfig::default(),
            storage: StorageConfig::default(),
            services: ServicesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name.
    #[serde(default = "default_project_name")]
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

fn default_project_name() -> String {
    "datalab".to_string()
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP port.
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Allowed CORS origins; `*` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_http_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output JSON format.
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

static ENV_VAR_PATTERN: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("env var pattern is valid")
});

/// Substitute environment variables in the format ${VAR_NAME}.
///
/// Unset variables are left untouched.
fn substitute_env_vars(content: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(content, |caps: &regex_lite::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
