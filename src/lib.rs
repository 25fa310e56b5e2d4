//! filter_chain - Ordered request/response filter chain for async HTTP servers.
//!
//! Filters intercept a request on its way to the handler and the response on
//! its way back. They are registered once, sorted by order, and selected per
//! request by path pattern and HTTP method.
//!
//! # Features
//!
//! - **Three filter kinds**: request-only, response-only and around filters
//! - **Short-circuit**: any filter may answer without reaching the handler
//! - **Mirror unwind**: entered filters see the outcome in reverse order
//! - **Blocking filters**: sync filter bodies run on a dedicated thread pool
//! - **Cancellation**: client disconnects and timeouts reach every entered filter
//! - **Ant-style patterns**: `/api/*`, `/static/**`, `/users/{id}`
//!
//! # Architecture
//!
//! - `FilterRegistry` - Filter entries, frozen before the first request
//! - `FilterChainExecutor` - Per-request state machine over the matched filters
//! - `Continuation` - Single-use handle an around filter proceeds through
//! - `ResponseProducer` - The handler at the end of the chain
//! - `Server` - hyper transport feeding requests into the executor
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use filter_chain::{around_fn, handler_fn, BlockingPool, FilterChainExecutor, FilterEntry, FilterRegistry, Response};
//!
//! let mut registry = FilterRegistry::new();
//! registry.register(
//!     FilterEntry::around(around_fn(|mut cont| async move {
//!         let res = cont.proceed_async().await?;
//!         Ok(res.with_header("x-served-by", "chain"))
//!     }))
//!     .name("tag")
//!     .pattern("/**"),
//! )?;
//!
//! let pool = Arc::new(BlockingPool::new(4, "blocking")?);
//! let handler = Arc::new(handler_fn(|_req| async { Ok(Response::ok("hello")) }));
//! let executor = FilterChainExecutor::new(registry, handler, pool);
//! let res = executor.execute(request).await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (8 chars) with optional "-dirty" suffix
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)" or "0.1.0 (abc12345-dirty)"
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod config;
pub mod core;
pub mod dispatch;
pub mod filter;
pub mod filters;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod server;

// Re-exports for convenience
pub use config::Config;
pub use crate::core::{Error, Request, Response, Result};
pub use dispatch::{handler_fn, BlockingHandler, ResponseProducer};
pub use filter::{
    around_fn, blocking_around_fn, request_fn, response_fn, AroundFilter, BlockingAroundFilter,
    ChainPhase, Continuation, ContinuationState, ExecuteOn, FilterChainExecutor, FilterEntry,
    FilterKind, FilterRegistry, FilterResult, RequestFilter, ResponseFilter, SHORT_CIRCUITED_BY,
};
pub use metrics::ChainMetrics;
pub use pool::BlockingPool;
pub use server::Server;
