//! Per-request execution state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::chain::ChainPhase;
use super::continuation::{Continuation, ResumeFn};
use super::MatchedFilters;
use crate::core::{Error, Request, Result};
use crate::dispatch::ResponseProducer;
use crate::metrics::ChainMetrics;
use crate::pool::{BlockingPool, ParkedLanes, PoolError, PoolResult};

/// State owned by one request while it runs through the chain.
///
/// Never shared between requests. The attribute bag is not here: it lives on
/// the [`Request`] and moves with it.
pub struct ExecutionContext {
    request_id: String,
    matched: MatchedFilters,
    phase: AtomicU8,
    started_at: Instant,
    cancel: CancellationToken,
    runtime: Handle,
    lanes: Arc<ParkedLanes>,
    pub(crate) producer: Arc<dyn ResponseProducer>,
    pub(crate) pool: Arc<BlockingPool>,
    pub(crate) metrics: Option<Arc<ChainMetrics>>,
}

impl ExecutionContext {
    pub(crate) fn new(
        request_id: String,
        matched: MatchedFilters,
        cancel: CancellationToken,
        producer: Arc<dyn ResponseProducer>,
        pool: Arc<BlockingPool>,
        metrics: Option<Arc<ChainMetrics>>,
    ) -> Self {
        Self {
            request_id,
            matched,
            phase: AtomicU8::new(ChainPhase::Matching as u8),
            started_at: Instant::now(),
            cancel,
            runtime: Handle::current(),
            lanes: Arc::new(ParkedLanes::new()),
            producer,
            pool,
            metrics,
        }
    }

    /// Request id for logs: the `x-request-id` header, or a generated one.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn matched(&self) -> &MatchedFilters {
        &self.matched
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn phase(&self) -> ChainPhase {
        ChainPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move the phase forward. Terminal phases are never left.
    pub(crate) fn advance(&self, to: ChainPhase) {
        let prev = ChainPhase::from_u8(self.phase.fetch_max(to as u8, Ordering::AcqRel));
        if prev < to {
            tracing::trace!(
                request_id = %self.request_id,
                from = prev.as_str(),
                to = to.as_str(),
                "chain phase"
            );
        }
    }

    /// Workers this request has parked in a blocking `proceed`.
    pub(crate) fn parked_lanes(&self) -> &Arc<ParkedLanes> {
        &self.lanes
    }

    /// Build the continuation handed to the around filter at `index - 1`.
    pub(crate) fn continuation(&self, request: Request, resume: ResumeFn) -> Continuation {
        Continuation::new(
            request,
            resume,
            self.runtime.clone(),
            self.cancel.clone(),
            Arc::clone(&self.lanes),
        )
    }

    /// Run a filter body on the blocking pool.
    ///
    /// A panic becomes a [`Error::FilterInvocation`] for `filter`; waiting
    /// stops early if the request is cancelled.
    pub(crate) async fn run_blocking<F, R>(&self, filter: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.pool.execute(f) => filter_result(filter, result),
        }
    }

    /// Run an entered filter body on the blocking pool and wait for it to
    /// return, cancelled or not.
    ///
    /// The body owns a continuation; cancellation reaches it through the
    /// downstream result instead.
    pub(crate) async fn run_blocking_entered<F, R>(&self, filter: &str, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        filter_result(filter, self.pool.execute(f).await)
    }
}

fn filter_result<R>(filter: &str, result: PoolResult<R>) -> Result<R> {
    match result {
        Ok(value) => Ok(value),
        Err(PoolError::WorkerPanic(msg)) => Err(Error::filter(filter, msg)),
        Err(e) => Err(e.into()),
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request_id)
            .field("matched", &self.matched)
            .field("phase", &self.phase())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
