//! Filter chain options.

use std::time::Duration;

use super::parse::env_duration;
use super::ConfigError;

/// Request deadline enforced by the executor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RequestTimeout(pub Option<Duration>);

impl RequestTimeout {
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    #[inline]
    pub fn as_millis(&self) -> u64 {
        self.0.map(|d| d.as_millis() as u64).unwrap_or(0)
    }

    #[inline]
    pub fn as_duration(&self) -> Option<Duration> {
        self.0
    }
}

/// Options passed to [`FilterChainExecutor`](crate::filter::FilterChainExecutor).
///
/// The default has no timeout. `from_env` defaults to 2 minutes.
#[derive(Clone, Debug, Default)]
pub struct ChainConfig {
    /// Cancel requests that run longer than this (REQUEST_TIMEOUT, "off" disables).
    pub request_timeout: RequestTimeout,
}

impl ChainConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            request_timeout: RequestTimeout(env_duration("REQUEST_TIMEOUT", "2m")?),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = RequestTimeout(Some(timeout));
        self
    }
}
