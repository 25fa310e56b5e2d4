//! Server configuration.

use std::net::SocketAddr;

use super::parse::{env_bool, env_or, parse_value};
use super::ConfigError;

/// Transport configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080).
    pub listen_addr: SocketAddr,
    /// Register the access-log filter (ACCESS_LOG=1).
    pub access_log: bool,
    /// Serve Prometheus metrics on /metrics (METRICS, default on).
    pub metrics: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let listen_addr = parse_value("LISTEN_ADDR", &env_or("LISTEN_ADDR", "0.0.0.0:8080"))?;

        Ok(Self {
            listen_addr,
            access_log: env_bool("ACCESS_LOG", false),
            metrics: env_bool("METRICS", true),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            access_log: false,
            metrics: true,
        }
    }
}
