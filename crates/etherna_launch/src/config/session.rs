//! Session configuration file schema

use crate::runtime::DiscoveryConfig;
use crate::services::Service;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Highest number of worker nodes the images exist for
pub const MAX_BEE_WORKERS: u8 = 4;

/// Protocol the backends are served with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Http => write!(f, "http"),
            Mode::Https => write!(f, "https"),
        }
    }
}

/// Which services to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceToggles {
    pub elastic: bool,
    pub mongo: bool,
    /// Chain node plus edge and worker bee nodes
    pub bee: bool,
    pub sso: bool,
    pub index: bool,
    pub gateway: bool,
    pub validator: bool,
    pub credit: bool,
    pub beehive: bool,
    pub interceptor: bool,
}

impl Default for ServiceToggles {
    fn default() -> Self {
        Self {
            elastic: true,
            mongo: true,
            bee: true,
            sso: true,
            index: true,
            gateway: true,
            validator: true,
            credit: true,
            beehive: true,
            interceptor: true,
        }
    }
}

impl ServiceToggles {
    /// Everything off; used as a base for explicit selections
    pub fn none() -> Self {
        Self {
            elastic: false,
            mongo: false,
            bee: false,
            sso: false,
            index: false,
            gateway: false,
            validator: false,
            credit: false,
            beehive: false,
            interceptor: false,
        }
    }

    /// Toggle by its configuration key
    pub fn set(&mut self, key: &str, enabled: bool) -> Result<(), ConfigError> {
        let slot = match key {
            "elastic" => &mut self.elastic,
            "mongo" => &mut self.mongo,
            "bee" => &mut self.bee,
            "sso" => &mut self.sso,
            "index" => &mut self.index,
            "gateway" => &mut self.gateway,
            "validator" => &mut self.validator,
            "credit" => &mut self.credit,
            "beehive" => &mut self.beehive,
            "interceptor" => &mut self.interceptor,
            other => return Err(ConfigError::UnknownService(other.to_string())),
        };
        *slot = enabled;
        Ok(())
    }

    /// Enabled services that start independently of each other
    pub fn independent(&self) -> Vec<Service> {
        [
            (self.elastic, Service::Elastic),
            (self.mongo, Service::Mongo),
            (self.beehive, Service::BeehiveManager),
            (self.index, Service::Index),
            (self.sso, Service::Sso),
            (self.gateway, Service::GatewayDashboard),
            (self.validator, Service::GatewayValidator),
            (self.credit, Service::Credit),
            (self.interceptor, Service::Interceptor),
        ]
        .into_iter()
        .filter_map(|(enabled, service)| enabled.then_some(service))
        .collect()
    }
}

/// Root session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub mode: Mode,

    /// Container runtime CLI
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Where certificates and the chain node password live
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default)]
    pub services: ServiceToggles,

    /// Number of worker bee nodes joining the edge node
    #[serde(default = "default_bee_workers")]
    pub bee_workers: u8,

    /// Environment overrides keyed by container name
    #[serde(default)]
    pub env: IndexMap<String, IndexMap<String, String>>,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// How long to wait for processes to exit on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("etherna-devenv")
}

fn default_bee_workers() -> u8 {
    1
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            runtime: default_runtime(),
            cache_dir: default_cache_dir(),
            services: ServiceToggles::default(),
            bee_workers: default_bee_workers(),
            env: IndexMap::new(),
            discovery: DiscoveryConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.trim().is_empty() {
            return Err(ConfigError::Validation(
                "'runtime' must name a container CLI".to_string(),
            ));
        }
        if self.bee_workers == 0 || self.bee_workers > MAX_BEE_WORKERS {
            return Err(ConfigError::Validation(format!(
                "'bee_workers' must be between 1 and {}, got {}",
                MAX_BEE_WORKERS, self.bee_workers
            )));
        }
        if self.discovery.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "'discovery.interval_ms' must be greater than zero".to_string(),
            ));
        }
        if self.discovery.max_attempts == Some(0) {
            return Err(ConfigError::Validation(
                "'discovery.max_attempts' must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown service '{0}'")]
    UnknownService(String),
}
