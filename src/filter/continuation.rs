//! Single-use handle on the rest of the chain, given to around filters.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::{Error, Request, Response, Result};
use crate::pool::{panic_message, ParkedLanes};

/// Runs the remainder of the chain for a request.
pub(crate) type ResumeFn =
    Box<dyn FnOnce(Request) -> BoxFuture<'static, Result<Response>> + Send>;

/// Lifecycle of a [`Continuation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ContinuationState {
    /// Not yet proceeded.
    Created = 0,
    /// The rest of the chain is running.
    Proceeded = 1,
    /// The downstream result has been delivered.
    Completed = 2,
}

impl ContinuationState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ContinuationState::Created,
            1 => ContinuationState::Proceeded,
            _ => ContinuationState::Completed,
        }
    }
}

/// The rest of the chain, from the point of view of one around filter.
///
/// Owns the pending request until [`proceed_async`](Self::proceed_async) or
/// [`proceed`](Self::proceed) hands it downstream. Both faces share one
/// single-shot promise: the remainder is spawned on the runtime and its
/// result delivered through a oneshot channel. Proceeding a second time
/// fails with [`Error::ContinuationReuse`] and leaves the first call alone.
///
/// Cancellation does not cut the wait short. It stops the innermost pending
/// work, and the resulting [`Error::Cancelled`] unwinds through every
/// entered filter in reverse order before `proceed` returns.
pub struct Continuation {
    request: Option<Request>,
    replaced: bool,
    state: Arc<AtomicU8>,
    resume: Option<ResumeFn>,
    runtime: Handle,
    cancel: CancellationToken,
    lanes: Arc<ParkedLanes>,
}

impl Continuation {
    pub(crate) fn new(
        request: Request,
        resume: ResumeFn,
        runtime: Handle,
        cancel: CancellationToken,
        lanes: Arc<ParkedLanes>,
    ) -> Self {
        Self {
            request: Some(request),
            replaced: false,
            state: Arc::new(AtomicU8::new(ContinuationState::Created as u8)),
            resume: Some(resume),
            runtime,
            cancel,
            lanes,
        }
    }

    /// The request the rest of the chain will see.
    pub fn request(&self) -> Result<&Request> {
        self.request.as_ref().ok_or(Error::ContinuationReuse {
            operation: "request accessed after proceed",
        })
    }

    /// Mutable access to the pending request.
    pub fn request_mut(&mut self) -> Result<&mut Request> {
        self.request.as_mut().ok_or(Error::ContinuationReuse {
            operation: "request accessed after proceed",
        })
    }

    /// Replace the pending request. Allowed once, before proceeding.
    ///
    /// Filter selection is already fixed; only what downstream filters and
    /// the handler see changes.
    pub fn replace_request(&mut self, request: Request) -> Result<()> {
        if self.request.is_none() {
            return Err(Error::ContinuationReuse {
                operation: "request replaced after proceed",
            });
        }
        if self.replaced {
            return Err(Error::ContinuationReuse {
                operation: "request replaced twice",
            });
        }
        self.request = Some(request);
        self.replaced = true;
        Ok(())
    }

    pub fn state(&self) -> ContinuationState {
        ContinuationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Cancellation token of the request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run the rest of the chain and get its result as a future.
    ///
    /// The downstream work starts immediately. Dropping the returned
    /// [`Proceed`] detaches it; it still stops on request cancellation.
    pub fn proceed_async(&mut self) -> Proceed {
        match self.start() {
            Ok(rx) => Proceed::new(wait(rx).boxed(), Some(Arc::clone(&self.state))),
            Err(e) => Proceed::new(future::ready(Err(e)).boxed(), None),
        }
    }

    /// Run the rest of the chain and block the current thread until it
    /// completes.
    ///
    /// Only valid off the event loop, i.e. in filters registered with
    /// [`FilterEntry::around_blocking`](super::FilterEntry::around_blocking).
    /// On a thread inside a runtime context it fails with
    /// [`Error::BlockingOnEventLoop`] and the continuation stays unused.
    /// That includes `spawn_blocking` and `block_in_place` threads, which
    /// may block but cannot be told apart from event-loop threads.
    ///
    /// While waiting, the worker runs blocking jobs submitted by the same
    /// request, so downstream blocking filters never queue behind it.
    pub fn proceed(&mut self) -> Result<Response> {
        if Handle::try_current().is_ok() {
            return Err(Error::BlockingOnEventLoop);
        }
        let rx = self.start()?;
        let result = self.lanes.park(&self.runtime, wait(rx));
        self.state
            .store(ContinuationState::Completed as u8, Ordering::Release);
        result
    }

    /// Claim the single proceed and spawn the remainder.
    fn start(&mut self) -> Result<oneshot::Receiver<Result<Response>>> {
        let (Some(request), Some(resume)) = (self.request.take(), self.resume.take()) else {
            return Err(Error::ContinuationReuse {
                operation: "proceed called twice",
            });
        };
        self.state
            .store(ContinuationState::Proceeded as u8, Ordering::Release);

        let (tx, rx) = oneshot::channel();
        let remainder = async move {
            let result = match AssertUnwindSafe(resume(request)).catch_unwind().await {
                Ok(r) => r,
                Err(panic) => Err(Error::handler(panic_message(panic))),
            };
            let _ = tx.send(result);
        };
        self.runtime.spawn(ParkedLanes::scope(Arc::clone(&self.lanes), remainder));
        Ok(rx)
    }

    /// Shared state cell, read by the executor to detect short-circuits.
    pub(crate) fn state_cell(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.state)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("state", &self.state())
            .field("replaced", &self.replaced)
            .finish()
    }
}

/// Wait for the downstream result. A dropped sender means the remainder
/// never ran to completion, e.g. because the runtime shut down.
async fn wait(rx: oneshot::Receiver<Result<Response>>) -> Result<Response> {
    rx.await.unwrap_or(Err(Error::Cancelled))
}

/// Future returned by [`Continuation::proceed_async`].
#[must_use = "the downstream response is lost unless awaited"]
pub struct Proceed {
    inner: BoxFuture<'static, Result<Response>>,
    state: Option<Arc<AtomicU8>>,
}

impl Proceed {
    fn new(inner: BoxFuture<'static, Result<Response>>, state: Option<Arc<AtomicU8>>) -> Self {
        Self { inner, state }
    }
}

impl Future for Proceed {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = futures_util::ready!(self.inner.as_mut().poll(cx));
        if let Some(state) = self.state.take() {
            state.store(ContinuationState::Completed as u8, Ordering::Release);
        }
        Poll::Ready(result)
    }
}
