//! Configuration for the registry, its codecs and its client
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (registry.toml)
//! - Environment variables (SCHEMA_REGISTRY__*)
//!
//! ## Example config file (registry.toml):
//! ```toml
//! [registry]
//! data_dir = "./registry-data"
//! default_mode = "BACKWARD"
//!
//! [serializer]
//! auto_register = true
//! omit_null_optionals = true
//! subject_kind = "value"
//!
//! [deserializer]
//! fail_unknown_properties = false
//!
//! [client]
//! max_retries = 3
//! initial_backoff_ms = 100
//! request_timeout_ms = 10000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::client::RetryPolicy;
use crate::codec::{DeserializerConfig, SerializerConfig};
use crate::compatibility::CompatibilityMode;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub registry: StoreConfig,

    #[serde(default)]
    pub serializer: SerializerConfig,

    #[serde(default)]
    pub deserializer: DeserializerConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

/// Store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the registry snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Mode for subjects without an override
    #[serde(default)]
    pub default_mode: CompatibilityMode,
}

/// Retry settings for registry calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Deadline for one call, retries included
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("registry-data")
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_mode: CompatibilityMode::default(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, optionally adding a required file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        for location in ["registry.toml", ".registry.toml", "config/registry.toml"] {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("dev", "json-schema", "registry") {
            let xdg_config = dirs.config_dir().join("registry.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // SCHEMA_REGISTRY__CLIENT__MAX_RETRIES=5
        builder = builder.add_source(
            Environment::with_prefix("SCHEMA_REGISTRY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Data directory, resolved against the working directory
    pub fn data_dir(&self) -> PathBuf {
        if self.registry.data_dir.is_absolute() {
            self.registry.data_dir.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.registry.data_dir)
        }
    }
}
