//! Configuration management for the realtime server binary.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files, the `PORT` environment variable and
//! command-line arguments.

use crate::cli::CliArgs;
use anyhow::{anyhow, Context};
use realtime_server::{OverflowPolicy, ServerConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Log levels accepted by [`AppConfig::validate`].
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
///
/// Every section may be omitted; missing values fall back to the same
/// defaults the library uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Network and HTTP settings
    pub server: ServerSettings,
    /// Persistence settings
    pub storage: StorageSettings,
    /// WebSocket endpoint settings
    pub websocket: WebSocketSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Network binding, connection limits and request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to listen on (e.g., "0.0.0.0")
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum number of concurrent client connections
    pub max_connections: usize,
    /// Request read and keep-alive idle timeout in seconds
    pub connection_timeout: u64,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON file the store is persisted to
    pub data_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketSettings {
    /// Path accepting upgrade requests
    pub path: String,
    /// Largest accepted inbound message in bytes
    pub max_frame_bytes: usize,
    /// Outbound messages buffered per client
    pub outbound_queue_capacity: usize,
    /// What happens to a client whose queue is full
    pub overflow_policy: OverflowPolicy,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            host: defaults.bind_address.ip().to_string(),
            port: defaults.bind_address.port(),
            max_connections: defaults.max_connections,
            connection_timeout: defaults.connection_timeout,
            max_body_bytes: defaults.max_body_bytes,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_file: ServerConfig::default().data_file,
        }
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        let defaults = ServerConfig::default();
        Self {
            path: defaults.websocket_path,
            max_frame_bytes: defaults.max_frame_bytes,
            outbound_queue_capacity: defaults.outbound_queue_capacity,
            overflow_policy: defaults.overflow_policy,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is written at
    /// the specified path and the defaults are returned.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded configuration and whether the file had to be created.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<(Self, bool)> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok((config, false))
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Ok((default_config, true))
        }
    }

    /// Applies overrides in precedence order: the `PORT` environment value
    /// first, then command-line flags on top of it.
    ///
    /// An unparsable `env_port` is ignored.
    pub fn apply_overrides(&mut self, args: &CliArgs, env_port: Option<&str>) {
        if let Some(port) = env_port.and_then(|p| p.trim().parse::<u16>().ok()) {
            self.server.port = port;
        }

        if let Some(host) = &args.host {
            self.server.host = host.clone();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(data_file) = &args.data_file {
            self.storage.data_file = data_file.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
    }

    /// The socket address built from `host` and `port`.
    pub fn bind_address(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .host
            .trim()
            .parse()
            .map_err(|_| anyhow!("Invalid host: {}", self.server.host))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Converts the application configuration to the library's
    /// [`ServerConfig`].
    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        Ok(ServerConfig {
            bind_address: self.bind_address()?,
            data_file: self.storage.data_file.clone(),
            websocket_path: self.websocket.path.clone(),
            max_connections: self.server.max_connections,
            connection_timeout: self.server.connection_timeout,
            max_body_bytes: self.server.max_body_bytes,
            max_frame_bytes: self.websocket.max_frame_bytes,
            outbound_queue_capacity: self.websocket.outbound_queue_capacity,
            overflow_policy: self.websocket.overflow_policy,
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing
    /// the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.bind_address().is_err() {
            return Err(format!("Invalid host: {}", self.server.host));
        }

        if self.storage.data_file.as_os_str().is_empty() {
            return Err("Data file path cannot be empty".to_string());
        }

        if !self.websocket.path.starts_with('/') {
            return Err(format!(
                "WebSocket path must start with '/': {}",
                self.websocket.path
            ));
        }

        if self.websocket.outbound_queue_capacity == 0 {
            return Err("WebSocket outbound queue capacity must be at least 1".to_string());
        }

        if self.server.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                self.logging.level
            ));
        }

        Ok(())
    }
}
