use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use crate::version::default_user_agent;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    /// Where the target registry is persisted.
    pub data_file: String,
    pub log_dir: String,
    pub probe_timeout_seconds: u64,
    pub max_concurrent_probes: usize,
    pub user_agent: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    bind_address: Option<IpAddr>,
    port: Option<u16>,
    data_file: Option<String>,
    log_dir: Option<String>,
    probe_timeout_seconds: Option<u64>,
    max_concurrent_probes: Option<usize>,
    user_agent: Option<String>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    5000
}

fn default_data_file() -> String {
    "urls.json".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_probe_timeout_seconds() -> u64 {
    crate::monitor::DEFAULT_PROBE_TIMEOUT.as_secs()
}

fn default_max_concurrent_probes() -> usize {
    crate::monitor::DEFAULT_MAX_CONCURRENT_PROBES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::merge(PartialServerConfig::default(), PartialServerConfig::default())
    }
}

impl ServerConfig {
    /// Loads defaults, then the TOML file at `config_path` (if it exists), then
    /// environment variables (`BIND_ADDRESS`, `PORT`, `DATA_FILE`, ...), each overriding the last.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path_str) => load_file(Path::new(path_str))?,
            None => PartialServerConfig::default(),
        };
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()?;

        let config = Self::merge(env_config, file_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(primary: PartialServerConfig, fallback: PartialServerConfig) -> Self {
        ServerConfig {
            bind_address: primary
                .bind_address
                .or(fallback.bind_address)
                .unwrap_or_else(default_bind_address),
            port: primary.port.or(fallback.port).unwrap_or_else(default_port),
            data_file: primary
                .data_file
                .or(fallback.data_file)
                .unwrap_or_else(default_data_file),
            log_dir: primary
                .log_dir
                .or(fallback.log_dir)
                .unwrap_or_else(default_log_dir),
            probe_timeout_seconds: primary
                .probe_timeout_seconds
                .or(fallback.probe_timeout_seconds)
                .unwrap_or_else(default_probe_timeout_seconds),
            max_concurrent_probes: primary
                .max_concurrent_probes
                .or(fallback.max_concurrent_probes)
                .unwrap_or_else(default_max_concurrent_probes),
            user_agent: primary
                .user_agent
                .or(fallback.user_agent)
                .unwrap_or_else(default_user_agent),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.probe_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "probe_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_probes == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_probes must be greater than 0".to_string(),
            ));
        }
        if self.data_file.trim().is_empty() {
            return Err(ConfigError::Invalid("data_file must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

fn load_file(path: &Path) -> Result<PartialServerConfig, ConfigError> {
    if !path.exists() {
        return Ok(PartialServerConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
