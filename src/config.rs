//! Configuration file parsing
//!
//! Parses the TOML configuration for the file hub server. Credentials are not
//! part of the file; the binary takes them from its command line or
//! environment.

use crate::metadata::DEFAULT_DESCRIPTION;
use crate::pipeline::StorageScheme;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Publish behaviour
    #[serde(default)]
    pub publish: PublishConfig,

    /// Content store backend
    pub store: StoreConfig,

    /// Ledger backend
    pub ledger: LedgerConfig,
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory uploads are spooled to
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Largest accepted file
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

/// Publish settings
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub scheme: StorageScheme,

    /// Description written into every metadata document
    #[serde(default = "default_description")]
    pub description: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            scheme: StorageScheme::default(),
            description: default_description(),
        }
    }
}

fn default_description() -> String {
    DEFAULT_DESCRIPTION.to_string()
}

/// Content store backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Pinata-compatible pinning service
    Pinning {
        #[serde(default = "default_api_url")]
        api_url: String,
        #[serde(default = "default_gateway_url")]
        gateway_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// Filesystem store
    Local {
        path: PathBuf,
        /// Prefix for public URLs
        #[serde(default = "default_local_gateway_url")]
        gateway_url: String,
    },
}

fn default_api_url() -> String {
    "https://api.pinata.cloud".to_string()
}

fn default_gateway_url() -> String {
    "https://gateway.pinata.cloud/ipfs/".to_string()
}

fn default_local_gateway_url() -> String {
    "http://localhost:8080/download-file/".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

/// Ledger backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LedgerConfig {
    /// Remote ledger node over JSON-RPC
    Rpc {
        rpc_url: String,
        #[serde(default = "default_record_store")]
        record_store: String,
        #[serde(default = "default_rpc_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_receipt_timeout_secs")]
        receipt_timeout_secs: u64,
        #[serde(default = "default_poll_interval_ms")]
        poll_interval_ms: u64,
    },
    /// Record book opened in-process
    Local {
        path: PathBuf,
        #[serde(default = "default_record_store")]
        record_store: String,
    },
}

fn default_record_store() -> String {
    "filehub".to_string()
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_receipt_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Listen address
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind.parse().map_err(|e| {
            ConfigError::Invalid(format!("server.bind {:?}: {}", self.server.bind, e))
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "server.max_upload_bytes must be greater than 0".to_string(),
            ));
        }

        match &self.store {
            StoreConfig::Pinning {
                api_url,
                gateway_url,
                timeout_secs,
            } => {
                if api_url.is_empty() {
                    return Err(ConfigError::Invalid("store.api_url is empty".to_string()));
                }
                check_gateway_url(gateway_url)?;
                if *timeout_secs == 0 {
                    return Err(ConfigError::Invalid(
                        "store.timeout_secs must be greater than 0".to_string(),
                    ));
                }
            }
            StoreConfig::Local { path, gateway_url } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "local store requires a path".to_string(),
                    ));
                }
                check_gateway_url(gateway_url)?;
            }
        }

        match &self.ledger {
            LedgerConfig::Rpc {
                rpc_url,
                record_store,
                timeout_secs,
                receipt_timeout_secs,
                poll_interval_ms,
            } => {
                if rpc_url.is_empty() {
                    return Err(ConfigError::Invalid("ledger.rpc_url is empty".to_string()));
                }
                check_record_store(record_store)?;
                if *timeout_secs == 0 || *receipt_timeout_secs == 0 || *poll_interval_ms == 0 {
                    return Err(ConfigError::Invalid(
                        "ledger timeouts and poll interval must be greater than 0".to_string(),
                    ));
                }
            }
            LedgerConfig::Local { path, record_store } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "local ledger requires a path".to_string(),
                    ));
                }
                check_record_store(record_store)?;
            }
        }

        Ok(())
    }
}

fn check_gateway_url(url: &str) -> Result<(), ConfigError> {
    if !url.ends_with('/') {
        return Err(ConfigError::Invalid(format!(
            "store.gateway_url must end with '/': {:?}",
            url
        )));
    }
    Ok(())
}

fn check_record_store(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "ledger.record_store must not be empty".to_string(),
        ));
    }
    Ok(())
}
