//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a TOML file.
    ///
    /// A file that exists but cannot be read or parsed is an error.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        tracing::info!("Configuration loaded and validated successfully");
        Ok(config)
    }

    /// Apply `POLYHUB_*` environment variables on top of `config`
    pub fn apply_env(mut config: Config) -> Result<Config> {
        if let Ok(name) = std::env::var("POLYHUB_NAME") {
            config.server.name = name;
        }

        if let Ok(addr) = std::env::var("POLYHUB_HTTP_ADDR") {
            config.server.http_addr = addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid POLYHUB_HTTP_ADDR: {}", addr))?;
        }

        if let Ok(addr) = std::env::var("POLYHUB_TCP_ADDR") {
            config.server.tcp_addr = addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid POLYHUB_TCP_ADDR: {}", addr))?;
        }

        if let Ok(max_users) = std::env::var("POLYHUB_MAX_USERS") {
            config.limits.max_users = max_users
                .parse::<usize>()
                .with_context(|| format!("Invalid POLYHUB_MAX_USERS: {}", max_users))?;
        }

        if let Ok(pong_wait) = std::env::var("POLYHUB_PONG_WAIT") {
            config.keepalive.pong_wait = humantime::parse_duration(&pong_wait)
                .with_context(|| format!("Invalid POLYHUB_PONG_WAIT: {}", pong_wait))?;
        }

        if let Ok(log_level) = std::env::var("POLYHUB_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn load_from_env() -> Result<Config> {
        let config = Self::apply_env(Config::default())?;
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_keepalive_config()
            .with_context(|| "Keepalive configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        self.validate_brothers()
            .with_context(|| "Brothers configuration validation failed")?;

        self.validate_encryption_config()
            .with_context(|| "Encryption configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.name.trim().is_empty() {
            bail!("server.name must not be empty");
        }

        if self.server.tcp_enabled && self.server.http_addr == self.server.tcp_addr {
            bail!("server.http_addr and server.tcp_addr must differ");
        }

        Ok(())
    }

    fn validate_keepalive_config(&self) -> Result<()> {
        let keepalive = &self.keepalive;

        if keepalive.write_wait.is_zero() {
            bail!("keepalive.write_wait must be greater than 0");
        }

        if keepalive.pong_wait <= keepalive.write_wait {
            bail!(
                "keepalive.pong_wait ({:?}) must be longer than keepalive.write_wait ({:?})",
                keepalive.pong_wait,
                keepalive.write_wait
            );
        }

        if keepalive.max_message_size == 0 {
            bail!("keepalive.max_message_size must be greater than 0");
        }

        if keepalive.send_queue_capacity == 0 {
            bail!("keepalive.send_queue_capacity must be greater than 0");
        }

        if keepalive.send_timeout.is_zero() {
            bail!("keepalive.send_timeout must be greater than 0");
        }

        if self.tcp.write_timeout.is_zero() {
            bail!("tcp.write_timeout must be greater than 0");
        }

        if self.tcp.scaling_check_period.is_zero() {
            bail!("tcp.scaling_check_period must be greater than 0");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of: {}", LOG_LEVELS.join(", "));
        }

        Ok(())
    }

    fn validate_brothers(&self) -> Result<()> {
        for (name, addr) in &self.brothers {
            if name.trim().is_empty() {
                bail!("brother with address {} has an empty name", addr);
            }

            if name == &self.server.name {
                bail!("brother {} has the same name as this server", name);
            }

            // Resolution is deferred to dial time; only the shape is checked here.
            let mut parts = addr.rsplitn(2, ':');
            let port = parts.next().unwrap_or_default();
            let host = parts.next().unwrap_or_default();
            if host.is_empty() || port.parse::<u16>().is_err() {
                bail!("brother {} has an invalid address {:?}, expected host:port", name, addr);
            }
        }

        Ok(())
    }

    fn validate_encryption_config(&self) -> Result<()> {
        let key = hex::decode(&self.encryption.hex_key)
            .with_context(|| "encryption.hex_key is not valid hex")?;
        if key.len() != 32 {
            bail!("encryption.hex_key must decode to 32 bytes, got {}", key.len());
        }

        let iv = hex::decode(&self.encryption.hex_iv)
            .with_context(|| "encryption.hex_iv is not valid hex")?;
        if iv.len() != 16 {
            bail!("encryption.hex_iv must decode to 16 bytes, got {}", iv.len());
        }

        if self.encryption.hash_size == 0 {
            bail!("encryption.hash_size must be greater than 0");
        }

        Ok(())
    }

    /// Resolve a brother's address for dialing
    pub fn brother_addr(&self, name: &str) -> Option<SocketAddr> {
        self.brothers
            .get(name)
            .and_then(|addr| addr.to_socket_addrs().ok())
            .and_then(|mut addrs| addrs.next())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        name: Option<&str>,
        http_addr: Option<SocketAddr>,
        tcp_addr: Option<SocketAddr>,
        no_tcp: bool,
        max_users: Option<usize>,
    ) {
        if let Some(name) = name {
            self.server.name = name.to_string();
            tracing::info!("CLI override: server name set to {}", name);
        }

        if let Some(addr) = http_addr {
            self.server.http_addr = addr;
            tracing::info!("CLI override: http address set to {}", addr);
        }

        if let Some(addr) = tcp_addr {
            self.server.tcp_addr = addr;
            tracing::info!("CLI override: tcp address set to {}", addr);
        }

        if no_tcp {
            self.server.tcp_enabled = false;
            tracing::info!("CLI override: tcp listener disabled");
        }

        if let Some(max_users) = max_users {
            self.limits.max_users = max_users;
            tracing::info!("CLI override: max users set to {}", max_users);
        }
    }
}
