//! Settings for collaborators this crate never talks to directly.
//!
//! The broker, object storage and sibling services are owned by other
//! deployments. Their settings are carried through as opaque values so that a
//! single configuration file can describe the whole platform.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Task-queue broker and result backend URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    #[serde(default = "default_result_backend")]
    pub result_backend: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            result_backend: default_result_backend(),
        }
    }
}

fn default_broker_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_result_backend() -> String {
    "redis://localhost:6379/1".to_string()
}

/// Object-storage endpoint and credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub access_key: String,

    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Use TLS when talking to the endpoint.
    #[serde(default)]
    pub secure: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: default_storage_endpoint(),
            access_key: String::new(),
            secret_key: String::new(),
            bucket: default_bucket(),
            secure: false,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &redact(&self.access_key))
            .field("secret_key", &redact(&self.secret_key))
            .field("bucket", &self.bucket)
            .field("secure", &self.secure)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        ""
    } else {
        "<redacted>"
    }
}

fn default_storage_endpoint() -> String {
    "localhost:9000".to_string()
}

fn default_bucket() -> String {
    "datasets".to_string()
}

/// Discovery URLs for sibling services, keyed by service name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServicesConfig {
    pub urls: BTreeMap<String, String>,
}

impl ServicesConfig {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.urls.get(name).map(String::as_str)
    }
}
