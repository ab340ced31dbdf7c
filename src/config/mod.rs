//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod server;

pub use server::ServerConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "patchbay.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "PATCHBAY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "PATCHBAY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "PATCHBAY_LOG";
/// Environment variable for the registry endpoint used by clients.
pub const REGISTRY_ENDPOINT_ENV_VAR: &str = "PATCHBAY_REGISTRY";

use serde::Deserialize;

use crate::client::Identity;
use crate::storage::StorageConfig;
use crate::transport::TransportConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control-plane server configuration.
    pub server: ServerConfig,
    /// Registry persistence configuration.
    pub storage: StorageConfig,
    /// Data-plane transport configuration.
    pub transport: TransportConfig,
    /// Identity this process registers under.
    pub identity: IdentityConfig,
}

/// Identity overrides for the running process.
///
/// Unset fields fall back to the executable name and the default
/// process id "def".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Executable name override.
    pub executable: Option<String>,
    /// Process id override, distinguishes multiple instances of one
    /// executable.
    pub process: Option<String>,
}

impl IdentityConfig {
    /// Resolve to a concrete identity, filling gaps from the environment.
    pub fn resolve(&self) -> Identity {
        let fallback = Identity::current();
        Identity::new(
            self.executable.as_deref().unwrap_or(&fallback.executable),
            self.process.as_deref().unwrap_or(&fallback.process),
        )
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `patchbay.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        // Add config file from path argument if provided
        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        // Add config file from CONFIG_ENV_VAR env var if set
        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            // Environment variables with CONFIG_ENV_PREFIX prefix
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Create config for testing: in-memory persistence, no file sources.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.storage.storage_type = crate::storage::StorageType::Memory;
        config
    }
}
