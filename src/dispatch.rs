//! Handlers that produce the response at the end of the chain.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Error, Request, Response, Result};
use crate::pool::{BlockingPool, PoolError};

/// Produces the response for a request that passed every filter.
///
/// Called exactly once per request, and never for a request a filter
/// short-circuited.
#[async_trait]
pub trait ResponseProducer: Send + Sync {
    async fn dispatch(&self, request: Request) -> Result<Response>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        "handler"
    }
}

#[async_trait]
impl<T: ResponseProducer + ?Sized> ResponseProducer for Arc<T> {
    async fn dispatch(&self, request: Request) -> Result<Response> {
        (**self).dispatch(request).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Async closure handler. Built by [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Wrap an async closure as a [`ResponseProducer`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> ResponseProducer for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn dispatch(&self, request: Request) -> Result<Response> {
        (self.0)(request).await
    }
}

/// Runs a synchronous handler on the blocking pool.
pub struct BlockingHandler<F> {
    pool: Arc<BlockingPool>,
    f: Arc<F>,
}

impl<F> BlockingHandler<F>
where
    F: Fn(Request) -> Result<Response> + Send + Sync + 'static,
{
    pub fn new(pool: Arc<BlockingPool>, f: F) -> Self {
        Self {
            pool,
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl<F> ResponseProducer for BlockingHandler<F>
where
    F: Fn(Request) -> Result<Response> + Send + Sync + 'static,
{
    async fn dispatch(&self, request: Request) -> Result<Response> {
        let f = Arc::clone(&self.f);
        match self.pool.execute(move || f(request)).await {
            Ok(result) => result,
            Err(PoolError::WorkerPanic(msg)) => Err(Error::handler(msg)),
            Err(e) => Err(e.into()),
        }
    }

    fn name(&self) -> &'static str {
        "blocking_handler"
    }
}
