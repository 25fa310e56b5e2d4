//! Core error types.

use std::fmt;

use crate::pool::PoolError;

/// Errors produced while running a request through the filter chain.
///
/// Filter and handler errors travel outward through every entered filter in
/// the same way responses do, so each of them can recover or pass them on.
#[derive(Debug)]
pub enum Error {
    /// A filter body failed.
    FilterInvocation { filter: String, message: String },

    /// A continuation was proceeded twice, or its request replaced twice or after proceeding.
    ContinuationReuse { operation: &'static str },

    /// The handler (response producer) failed.
    Handler(String),

    /// The client went away or the request deadline expired.
    Cancelled,

    /// A filter was registered after the registry was frozen.
    RegistryFrozen,

    /// A filter pattern could not be compiled.
    InvalidPattern { pattern: String, reason: String },

    /// Blocking `proceed` was called on an event-loop thread.
    BlockingOnEventLoop,

    /// The blocking worker pool rejected or lost the job.
    Pool(PoolError),
}

impl Error {
    /// Build a filter invocation error.
    pub fn filter(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FilterInvocation {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// Build a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True for contract violations by filter code (reuse, frozen registry, blocking misuse).
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::ContinuationReuse { .. } | Error::RegistryFrozen | Error::BlockingOnEventLoop
        )
    }

    /// Short stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::FilterInvocation { .. } => "filter",
            Error::ContinuationReuse { .. } => "continuation_reuse",
            Error::Handler(_) => "handler",
            Error::Cancelled => "cancelled",
            Error::RegistryFrozen => "registry_frozen",
            Error::InvalidPattern { .. } => "invalid_pattern",
            Error::BlockingOnEventLoop => "blocking_on_event_loop",
            Error::Pool(_) => "pool",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FilterInvocation { filter, message } => {
                write!(f, "filter '{}' failed: {}", filter, message)
            }
            Error::ContinuationReuse { operation } => {
                write!(f, "illegal continuation reuse: {}", operation)
            }
            Error::Handler(msg) => write!(f, "handler error: {}", msg),
            Error::Cancelled => write!(f, "request cancelled"),
            Error::RegistryFrozen => write!(f, "filter registry is frozen"),
            Error::InvalidPattern { pattern, reason } => {
                write!(f, "invalid pattern '{}': {}", pattern, reason)
            }
            Error::BlockingOnEventLoop => {
                write!(f, "blocking proceed called on an event-loop thread")
            }
            Error::Pool(e) => write!(f, "blocking pool error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pool(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PoolError> for Error {
    fn from(e: PoolError) -> Self {
        Error::Pool(e)
    }
}

/// Result type alias for chain operations.
pub type Result<T> = std::result::Result<T, Error>;
