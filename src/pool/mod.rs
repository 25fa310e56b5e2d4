//! Blocking worker pool.
//!
//! Filters and handlers marked as blocking run here instead of on the
//! event-loop threads of the tokio runtime.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      BlockingPool                          │
//! ├────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐    ┌─────────┐    ┌─────────┐                 │
//! │  │ Worker1 │    │ Worker2 │    │ Worker3 │  ...            │
//! │  └────┬────┘    └────┬────┘    └────┬────┘                 │
//! │       └──────────────┴──────────────┘                      │
//! │                      │                                     │
//! │              ┌───────▼───────┐                             │
//! │              │  mpsc channel │  (bounded queue)            │
//! │              └───────┬───────┘                             │
//! │              ┌───────▼───────┐                             │
//! │              │   execute()   │  (async interface)          │
//! │              └───────────────┘                             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! A blocking filter that proceeds parks its worker until the downstream
//! chain completes. While parked, the worker runs the blocking jobs of its
//! own request (see [`ParkedLanes`]), so a single request never deadlocks
//! on a worker it holds. Concurrent requests still each hold one worker per
//! entered blocking around filter.

mod error;
mod lane;
mod thread;

pub use error::{PoolError, PoolResult};
pub use lane::ParkedLanes;
pub use thread::BlockingPool;

use std::any::Any;

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
