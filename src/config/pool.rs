//! Runtime and blocking pool sizing.

use std::num::NonZeroUsize;

use super::parse::{env_or, parse_value};
use super::ConfigError;

/// Queue slots per blocking worker when BLOCKING_QUEUE_CAPACITY is 0.
const QUEUE_PER_WORKER: usize = 100;

/// Thread sizing loaded from environment.
///
/// All values are resolved at construction time; zero means "auto" in the
/// environment but never in this struct.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// tokio worker threads (EVENT_LOOP_WORKERS, 0 = CPU count).
    event_loop_workers: NonZeroUsize,
    /// Blocking pool threads (BLOCKING_WORKERS, 0 = CPU count).
    blocking_workers: NonZeroUsize,
    /// Blocking queue slots (BLOCKING_QUEUE_CAPACITY, 0 = workers * 100).
    queue_capacity: NonZeroUsize,
}

impl PoolConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(
            &env_or("EVENT_LOOP_WORKERS", "0"),
            &env_or("BLOCKING_WORKERS", "0"),
            &env_or("BLOCKING_QUEUE_CAPACITY", "0"),
        )
    }

    /// Resolve raw values as they appear in the environment.
    fn resolve(event_loop: &str, blocking: &str, capacity: &str) -> Result<Self, ConfigError> {
        let event_loop_workers = Self::worker_count("EVENT_LOOP_WORKERS", event_loop)?;
        let blocking_workers = Self::worker_count("BLOCKING_WORKERS", blocking)?;

        let raw: usize = parse_value("BLOCKING_QUEUE_CAPACITY", capacity)?;
        let count = if raw == 0 {
            blocking_workers.get() * QUEUE_PER_WORKER
        } else {
            raw
        };
        let queue_capacity = NonZeroUsize::new(count).ok_or_else(|| ConfigError::Invalid {
            key: "BLOCKING_QUEUE_CAPACITY".into(),
            message: "queue capacity cannot be zero".into(),
        })?;

        Ok(Self {
            event_loop_workers,
            blocking_workers,
            queue_capacity,
        })
    }

    fn worker_count(key: &str, raw: &str) -> Result<NonZeroUsize, ConfigError> {
        let workers: usize = parse_value(key, raw)?;
        // Resolve 0 to CPU count
        let count = if workers == 0 { num_cpus::get() } else { workers };
        NonZeroUsize::new(count).ok_or_else(|| ConfigError::Invalid {
            key: key.into(),
            message: "worker count cannot be zero".into(),
        })
    }

    #[inline]
    pub fn event_loop_workers(&self) -> usize {
        self.event_loop_workers.get()
    }

    #[inline]
    pub fn blocking_workers(&self) -> usize {
        self.blocking_workers.get()
    }

    #[inline]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.get()
    }
}
