//! Logging configuration.

use super::parse::env_or;
use super::ConfigError;

const DEFAULT_FILTER: &str = "filter_chain=info";

/// Logging configuration loaded from environment.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// `EnvFilter` directive (from LOG_LEVEL or RUST_LOG).
    pub filter: String,
    /// Service name stamped on every JSON log line.
    pub service_name: String,
    /// Emit JSON lines (LOG_FORMAT=json, default) or human-readable text.
    pub json: bool,
}

impl LoggingConfig {
    /// Load configuration from environment variables.
    ///
    /// LOG_LEVEL wins over RUST_LOG. LOG_LEVEL takes a bare level and applies
    /// it to this crate; RUST_LOG takes full directive syntax.
    pub fn from_env() -> Result<Self, ConfigError> {
        let filter = resolve_filter(
            std::env::var("LOG_LEVEL").ok().as_deref(),
            std::env::var("RUST_LOG").ok().as_deref(),
        )?;
        Ok(Self {
            filter,
            service_name: env_or("SERVICE_NAME", "filter_chain"),
            json: !env_or("LOG_FORMAT", "json").eq_ignore_ascii_case("text"),
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            service_name: "filter_chain".to_string(),
            json: true,
        }
    }
}

/// Pick the filter directive. An unknown LOG_LEVEL is an error rather than
/// a silent fallback.
fn resolve_filter(log_level: Option<&str>, rust_log: Option<&str>) -> Result<String, ConfigError> {
    if let Some(level) = log_level.filter(|l| !l.is_empty()) {
        let level = level.to_lowercase();
        return match level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(format!("filter_chain={}", level)),
            _ => Err(ConfigError::Invalid {
                key: "LOG_LEVEL".into(),
                message: format!("'{}', expected: trace, debug, info, warn, error", level),
            }),
        };
    }

    Ok(rust_log
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_string())
}
