//! Configuration Types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::peer::Role;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: ConnectionLimits,
    pub keepalive: KeepaliveConfig,
    pub http: HttpConfig,
    pub tcp: TcpConfig,
    pub logging: LoggingConfig,
    /// Sibling servers, name -> `host:port` of their HTTP listener
    pub brothers: BTreeMap<String, String>,
    pub encryption: EncryptionConfig,
}

/// Server identity and listener addresses
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub http_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
    pub tcp_enabled: bool,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Per-role connection ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionLimits {
    pub max_users: usize,
    pub max_monitors: usize,
    pub max_servers: usize,
    pub max_incoming: usize,
}

impl ConnectionLimits {
    /// Ceiling that applies to a role's bucket.
    ///
    /// Unidentified peers share the incoming ceiling.
    pub fn ceiling(&self, role: Role) -> usize {
        match role {
            Role::User => self.max_users,
            Role::Monitor => self.max_monitors,
            Role::Server => self.max_servers,
            Role::Incoming | Role::Undefined => self.max_incoming,
        }
    }
}

/// Keepalive and outbound queue settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    #[serde(with = "humantime_serde")]
    pub write_wait: Duration,
    #[serde(with = "humantime_serde")]
    pub pong_wait: Duration,
    pub max_message_size: usize,
    pub send_queue_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl KeepaliveConfig {
    /// Probes go out at 9/10 of the liveness timeout.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

/// WebSocket listener tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
}

/// Framed TCP listener tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TcpConfig {
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub scaling_check_period: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Key material for sibling links. Validated here, consumed elsewhere.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub hash_size: usize,
    pub hex_key: String,
    pub hex_iv: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "polyhub".to_string(),
            http_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            tcp_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            tcp_enabled: true,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_users: 100,
            max_monitors: 3,
            max_servers: 5,
            max_incoming: 50,
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(5),
            pong_wait: Duration::from_secs(60),
            max_message_size: 512,
            send_queue_capacity: 256,
            send_timeout: Duration::from_secs(1),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 4096,
            write_buffer_size: 4096,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(1),
            scaling_check_period: Duration::from_secs(10),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            hash_size: 8,
            hex_key: "0".repeat(64),
            hex_iv: "0".repeat(32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_nine_tenths_of_pong_wait() {
        let keepalive = KeepaliveConfig::default();
        assert_eq!(keepalive.ping_period(), Duration::from_secs(54));
    }

    #[test]
    fn undefined_peers_use_the_incoming_ceiling() {
        let limits = ConnectionLimits {
            max_users: 1,
            max_monitors: 2,
            max_servers: 3,
            max_incoming: 4,
        };
        assert_eq!(limits.ceiling(Role::User), 1);
        assert_eq!(limits.ceiling(Role::Monitor), 2);
        assert_eq!(limits.ceiling(Role::Server), 3);
        assert_eq!(limits.ceiling(Role::Incoming), 4);
        assert_eq!(limits.ceiling(Role::Undefined), 4);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [limits]
            max_users = 7

            [keepalive]
            pong_wait = "30s"
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.max_users, 7);
        assert_eq!(config.limits.max_monitors, 3);
        assert_eq!(config.keepalive.pong_wait, Duration::from_secs(30));
        assert_eq!(config.keepalive.write_wait, Duration::from_secs(5));
        assert_eq!(config.server.name, "polyhub");
    }
}
