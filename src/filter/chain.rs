//! Filter chain executor.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use super::context::ExecutionContext;
use super::continuation::{ContinuationState, ResumeFn};
use super::{ExecuteOn, FilterEntry, FilterRegistry, FilterResult, Invoke, SHORT_CIRCUITED_BY};
use crate::config::ChainConfig;
use crate::core::{Error, Request, Response, Result};
use crate::dispatch::ResponseProducer;
use crate::metrics::ChainMetrics;
use crate::pool::{panic_message, BlockingPool, ParkedLanes};

/// Where a request is in the chain.
///
/// Phases only move forward; `Done` and `Errored` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ChainPhase {
    Matching = 0,
    RequestPhase = 1,
    Dispatching = 2,
    ResponsePhase = 3,
    Done = 4,
    Errored = 5,
}

impl ChainPhase {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ChainPhase::Matching,
            1 => ChainPhase::RequestPhase,
            2 => ChainPhase::Dispatching,
            3 => ChainPhase::ResponsePhase,
            4 => ChainPhase::Done,
            _ => ChainPhase::Errored,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainPhase::Matching => "matching",
            ChainPhase::RequestPhase => "request",
            ChainPhase::Dispatching => "dispatching",
            ChainPhase::ResponsePhase => "response",
            ChainPhase::Done => "done",
            ChainPhase::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainPhase::Done | ChainPhase::Errored)
    }
}

/// Runs requests through the matching filters and the handler.
///
/// ```text
/// MATCHING → REQUEST_PHASE → DISPATCHING → RESPONSE_PHASE → DONE
///                 │               │               │
///                 └───────────────┴───────────────┴──→ ERRORED
/// ```
///
/// Every request produces exactly one response or one error. The handler is
/// called at most once and never after a filter short-circuited. Entered
/// filters observe the outcome in reverse entry order.
pub struct FilterChainExecutor {
    registry: Arc<FilterRegistry>,
    producer: Arc<dyn ResponseProducer>,
    pool: Arc<BlockingPool>,
    config: ChainConfig,
    metrics: Option<Arc<ChainMetrics>>,
}

impl FilterChainExecutor {
    /// Create an executor. The registry is frozen here.
    pub fn new(
        mut registry: FilterRegistry,
        producer: Arc<dyn ResponseProducer>,
        pool: Arc<BlockingPool>,
    ) -> Self {
        registry.freeze();
        Self {
            registry: Arc::new(registry),
            producer,
            pool,
            config: ChainConfig::default(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ChainMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BlockingPool> {
        &self.pool
    }

    /// Run a request to completion.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_with_cancel(request, CancellationToken::new()).await
    }

    /// Run a request that stops early when `cancel` fires.
    ///
    /// The transport cancels the token when the client disconnects. A
    /// configured request timeout cancels it too.
    pub async fn execute_with_cancel(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<Response> {
        let request_id = request
            .request_id()
            .map(str::to_string)
            .unwrap_or_else(generate_request_id);

        let matched = self.registry.resolve(request.path(), request.method());
        tracing::trace!(
            request_id = %request_id,
            method = %request.method(),
            path = request.path(),
            filters = ?matched.names(),
            "filters resolved"
        );

        let ctx = Arc::new(ExecutionContext::new(
            request_id,
            matched,
            cancel.clone(),
            Arc::clone(&self.producer),
            Arc::clone(&self.pool),
            self.metrics.clone(),
        ));
        ctx.advance(ChainPhase::RequestPhase);

        let lanes = Arc::clone(ctx.parked_lanes());
        let run = ParkedLanes::scope(lanes, walk(Arc::clone(&ctx), 0, request));
        let result = match self.config.request_timeout.as_duration() {
            Some(limit) => {
                tokio::pin!(run);
                tokio::select! {
                    biased;
                    result = &mut run => result,
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!(
                            request_id = %ctx.request_id(),
                            timeout_ms = limit.as_millis() as u64,
                            "request timed out"
                        );
                        cancel.cancel();
                        // Entered filters still unwind and see the cancellation
                        run.await
                    }
                }
            }
            None => run.await,
        };

        self.finish(&ctx, &result);
        result
    }

    fn finish(&self, ctx: &ExecutionContext, result: &Result<Response>) {
        let elapsed = ctx.elapsed();
        match result {
            Ok(res) => {
                ctx.advance(ChainPhase::Done);
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    status = res.status().as_u16(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "chain completed"
                );
            }
            Err(e) => {
                ctx.advance(ChainPhase::Errored);
                if e.is_cancelled() {
                    tracing::debug!(request_id = %ctx.request_id(), "chain cancelled");
                } else {
                    tracing::warn!(
                        request_id = %ctx.request_id(),
                        error = %e,
                        kind = e.kind(),
                        "chain failed"
                    );
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            let outcome = match result {
                Ok(_) => "ok",
                Err(e) if e.is_cancelled() => "cancelled",
                Err(_) => "error",
            };
            metrics.record_request(outcome, elapsed);
            if let Err(e) = result {
                metrics.record_error(e.kind());
            }
        }
    }
}

/// Short id for requests that arrive without `x-request-id`.
fn generate_request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

/// Run the chain from filter `index` onward.
fn walk(
    ctx: Arc<ExecutionContext>,
    index: usize,
    req: Request,
) -> BoxFuture<'static, Result<Response>> {
    async move {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let Some(entry) = ctx.matched().get(index).cloned() else {
            return dispatch(&ctx, req).await;
        };

        tracing::trace!(
            request_id = %ctx.request_id(),
            filter = entry.get_name(),
            kind = entry.kind().as_str(),
            order = entry.get_order(),
            "entering filter"
        );

        match entry.invoke().clone() {
            Invoke::Request(_) => match run_request_filter(&ctx, &entry, req).await? {
                FilterResult::Next(req) => walk(ctx, index + 1, req).await,
                FilterResult::Stop(mut res) => {
                    ctx.advance(ChainPhase::ResponsePhase);
                    short_circuited(&ctx, &entry, &mut res);
                    Ok(res)
                }
                // Resolved by run_request_filter
                FilterResult::Deferred(_) => Err(Error::filter(
                    entry.get_name(),
                    "deferred result was not resolved",
                )),
            },

            Invoke::Response(filter) => {
                let snapshot = req.clone();
                let downstream = walk(Arc::clone(&ctx), index + 1, req).await;
                ctx.advance(ChainPhase::ResponsePhase);
                run_response_filter(&ctx, &entry, filter, snapshot, downstream).await
            }

            Invoke::Around(filter) => {
                let cont = ctx.continuation(req, resume_from(&ctx, index + 1));
                let state = cont.state_cell();
                let mut result = match AssertUnwindSafe(filter.filter(cont)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(Error::filter(entry.get_name(), panic_message(panic))),
                };
                observe_around(&ctx, &entry, state.load(Ordering::Acquire), &mut result);
                result
            }

            Invoke::BlockingAround(filter) => {
                let cont = ctx.continuation(req, resume_from(&ctx, index + 1));
                let state = cont.state_cell();
                let mut result = ctx
                    .run_blocking_entered(entry.get_name(), move || filter.filter(cont))
                    .await
                    .and_then(|r| r);
                observe_around(&ctx, &entry, state.load(Ordering::Acquire), &mut result);
                result
            }
        }
    }
    .boxed()
}

fn resume_from(ctx: &Arc<ExecutionContext>, index: usize) -> ResumeFn {
    let ctx = Arc::clone(ctx);
    Box::new(move |req| walk(ctx, index, req))
}

/// Call a request filter and settle any deferred result.
async fn run_request_filter(
    ctx: &ExecutionContext,
    entry: &FilterEntry,
    req: Request,
) -> Result<FilterResult> {
    let Invoke::Request(filter) = entry.invoke().clone() else {
        return Ok(FilterResult::Next(req));
    };
    let name = entry.get_name();

    let mut result = match entry.execute_on() {
        ExecuteOn::EventLoop => {
            std::panic::catch_unwind(AssertUnwindSafe(|| filter.filter(req)))
                .map_err(|panic| Error::filter(name, panic_message(panic)))?
        }
        ExecuteOn::Blocking => ctx.run_blocking(name, move || filter.filter(req)).await?,
    }?;

    while let FilterResult::Deferred(fut) = result {
        result = tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => return Err(Error::Cancelled),
            settled = AssertUnwindSafe(fut).catch_unwind() => {
                settled.map_err(|panic| Error::filter(name, panic_message(panic)))??
            }
        };
    }
    Ok(result)
}

/// Hand the downstream outcome to a response filter.
async fn run_response_filter(
    ctx: &ExecutionContext,
    entry: &FilterEntry,
    filter: Arc<dyn super::ResponseFilter>,
    req: Request,
    downstream: Result<Response>,
) -> Result<Response> {
    let name = entry.get_name();
    let observe = move || match downstream {
        Ok(res) => filter.on_response(&req, res),
        Err(err) => filter.on_error(&req, err),
    };

    match entry.execute_on() {
        ExecuteOn::EventLoop => std::panic::catch_unwind(AssertUnwindSafe(observe))
            .map_err(|panic| Error::filter(name, panic_message(panic)))?,
        ExecuteOn::Blocking => ctx.run_blocking(name, observe).await?,
    }
}

/// End of the filter list: call the handler once.
async fn dispatch(ctx: &ExecutionContext, req: Request) -> Result<Response> {
    ctx.advance(ChainPhase::Dispatching);
    tracing::trace!(
        request_id = %ctx.request_id(),
        handler = ctx.producer.name(),
        filters = ctx.matched().len(),
        "dispatching"
    );

    let producer = Arc::clone(&ctx.producer);
    let result = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => Err(Error::Cancelled),
        produced = AssertUnwindSafe(producer.dispatch(req)).catch_unwind() => match produced {
            Ok(result) => result,
            Err(panic) => Err(Error::handler(panic_message(panic))),
        },
    };

    ctx.advance(ChainPhase::ResponsePhase);
    result
}

/// Log and tag a short-circuit. The innermost filter that answered wins.
fn short_circuited(ctx: &ExecutionContext, entry: &FilterEntry, res: &mut Response) {
    if !res.attributes().contains(SHORT_CIRCUITED_BY) {
        res.attributes_mut()
            .insert(SHORT_CIRCUITED_BY, entry.get_name().to_string());
    }
    tracing::debug!(
        request_id = %ctx.request_id(),
        filter = entry.get_name(),
        status = %res.status(),
        "filter short-circuited request"
    );
    if let Some(metrics) = &ctx.metrics {
        metrics.record_short_circuit(entry.get_name());
    }
}

/// Log the outcome of an around filter; no proceed means short-circuit.
fn observe_around(
    ctx: &ExecutionContext,
    entry: &FilterEntry,
    state: u8,
    result: &mut Result<Response>,
) {
    if state != ContinuationState::Created as u8 {
        return;
    }
    match result {
        Ok(res) => short_circuited(ctx, entry, res),
        Err(e) => tracing::debug!(
            request_id = %ctx.request_id(),
            filter = entry.get_name(),
            error = %e,
            "filter failed before proceeding"
        ),
    }
}
