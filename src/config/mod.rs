//! Configuration loaded from environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use filter_chain::config::Config;
//!
//! let config = Config::from_env()?;
//! println!("Listen address: {}", config.server.listen_addr);
//! println!("Blocking workers: {}", config.pool.blocking_workers());
//! ```

mod chain;
mod error;
mod logging;
mod parse;
mod pool;
mod server;

pub use chain::{ChainConfig, RequestTimeout};
pub use error::ConfigError;
pub use logging::LoggingConfig;
pub use parse::parse_duration;
pub use pool::PoolConfig;
pub use server::ServerConfig;

/// Complete application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub chain: ChainConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            pool: PoolConfig::from_env()?,
            chain: ChainConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Print configuration summary to log.
    pub fn log_summary(&self) {
        use tracing::info;

        info!("Configuration loaded:");
        info!("  Listen: {}", self.server.listen_addr);
        info!("  Event loop workers: {}", self.pool.event_loop_workers());
        info!(
            "  Blocking workers: {} (queue {})",
            self.pool.blocking_workers(),
            self.pool.queue_capacity()
        );

        if self.chain.request_timeout.is_enabled() {
            info!(
                "  Request timeout: {}ms",
                self.chain.request_timeout.as_millis()
            );
        } else {
            info!("  Request timeout: disabled");
        }

        if self.server.access_log {
            info!("  Access log: enabled");
        }
        if self.server.metrics {
            info!("  Metrics: /metrics");
        }
    }
}
