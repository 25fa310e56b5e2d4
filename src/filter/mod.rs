//! Request/response filters that run around route dispatch.
//!
//! A filter is registered as a [`FilterEntry`] in a [`FilterRegistry`] and
//! takes one of three shapes:
//!
//! - **Request** filters run before dispatch. They may mutate the request,
//!   short-circuit with a response, or defer that decision to a future.
//! - **Response** filters observe the downstream outcome (response or error)
//!   on the way back out.
//! - **Around** filters receive a [`Continuation`] and decide whether and how
//!   to proceed with the rest of the chain.
//!
//! # Lifecycle
//!
//! ```text
//! Request → F1 → F2 → F3 → Handler
//!                            ↓
//! Response ← F1 ← F2 ← F3 ←──┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use filter_chain::filter::{around_fn, request_fn, FilterEntry, FilterRegistry, FilterResult};
//!
//! let mut registry = FilterRegistry::new();
//! registry.register(
//!     FilterEntry::request(request_fn(|mut req| {
//!         req.set_attribute("seen", true);
//!         Ok(FilterResult::Next(req))
//!     }))
//!     .name("mark")
//!     .pattern("/api/**")
//!     .order(-10),
//! )?;
//! registry.register(FilterEntry::around(around_fn(|mut cont| async move {
//!     let res = cont.proceed_async().await?;
//!     Ok(res.with_header("x-wrapped", "1"))
//! })))?;
//! ```

mod chain;
mod context;
mod continuation;
pub mod pattern;
mod registry;

pub use chain::{ChainPhase, FilterChainExecutor};
pub use context::ExecutionContext;
pub use continuation::{Continuation, ContinuationState, Proceed};
pub use pattern::{PathMatch, PathPattern, PatternStyle};
pub use registry::{FilterRegistry, MatchedFilters};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use http::Method;

use crate::core::{Error, Request, Response, Result};

/// Response attribute naming the filter that answered without reaching
/// the handler.
pub const SHORT_CIRCUITED_BY: &str = "filter_chain.short_circuited_by";

/// Outcome of a request filter.
pub enum FilterResult {
    /// Continue with the (possibly modified) request.
    Next(Request),
    /// Stop the chain and answer with this response.
    Stop(Response),
    /// Decide later. The future resolves to another `FilterResult`.
    Deferred(BoxFuture<'static, Result<FilterResult>>),
}

impl FilterResult {
    /// Defer the decision to `fut`.
    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = Result<FilterResult>> + Send + 'static,
    {
        FilterResult::Deferred(fut.boxed())
    }

    pub fn is_next(&self) -> bool {
        matches!(self, FilterResult::Next(_))
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, FilterResult::Stop(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, FilterResult::Deferred(_))
    }

    /// Unwrap the request if this is a Next result.
    pub fn into_request(self) -> Option<Request> {
        match self {
            FilterResult::Next(req) => Some(req),
            _ => None,
        }
    }

    /// Unwrap the response if this is a Stop result.
    pub fn into_response(self) -> Option<Response> {
        match self {
            FilterResult::Stop(res) => Some(res),
            _ => None,
        }
    }
}

impl fmt::Debug for FilterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterResult::Next(req) => f.debug_tuple("Next").field(req).finish(),
            FilterResult::Stop(res) => f.debug_tuple("Stop").field(&res.status()).finish(),
            FilterResult::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Where a filter body runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecuteOn {
    /// Inline on the runtime thread handling the request. Must not block.
    #[default]
    EventLoop,
    /// On the bounded [`BlockingPool`](crate::pool::BlockingPool).
    Blocking,
}

/// Shape of a registered filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Request,
    Response,
    Around,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Request => "request",
            FilterKind::Response => "response",
            FilterKind::Around => "around",
        }
    }
}

/// Runs before dispatch.
///
/// Filters are shared by all requests. Keep per-request data in the
/// request attribute bag, not in `self`.
pub trait RequestFilter: Send + Sync {
    /// Name used in logs when the entry does not set one.
    fn name(&self) -> &'static str {
        "request"
    }

    fn filter(&self, req: Request) -> Result<FilterResult>;
}

/// Runs after the downstream chain produced a response or an error.
pub trait ResponseFilter: Send + Sync {
    fn name(&self) -> &'static str {
        "response"
    }

    /// Observe or replace a downstream response.
    fn on_response(&self, req: &Request, res: Response) -> Result<Response>;

    /// Observe a downstream error. Returning `Ok` recovers it.
    fn on_error(&self, _req: &Request, err: Error) -> Result<Response> {
        Err(err)
    }
}

/// Wraps the rest of the chain.
///
/// Not calling [`Continuation::proceed_async`] short-circuits the chain with
/// whatever response the filter returns.
#[async_trait]
pub trait AroundFilter: Send + Sync {
    fn name(&self) -> &'static str {
        "around"
    }

    async fn filter(&self, cont: Continuation) -> Result<Response>;
}

/// Around filter with a synchronous body, always run on the blocking pool.
///
/// The body may call the blocking [`Continuation::proceed`].
pub trait BlockingAroundFilter: Send + Sync {
    fn name(&self) -> &'static str {
        "around_blocking"
    }

    fn filter(&self, cont: Continuation) -> Result<Response>;
}

/// Closure-backed [`RequestFilter`]. Built by [`request_fn`].
pub struct RequestFn<F>(F);

/// Wrap a closure as a request filter.
pub fn request_fn<F>(f: F) -> RequestFn<F>
where
    F: Fn(Request) -> Result<FilterResult> + Send + Sync + 'static,
{
    RequestFn(f)
}

impl<F> RequestFilter for RequestFn<F>
where
    F: Fn(Request) -> Result<FilterResult> + Send + Sync,
{
    fn filter(&self, req: Request) -> Result<FilterResult> {
        (self.0)(req)
    }
}

/// Closure-backed [`ResponseFilter`]. Built by [`response_fn`].
pub struct ResponseFn<F>(F);

/// Wrap a closure as a response filter. Errors pass through untouched.
pub fn response_fn<F>(f: F) -> ResponseFn<F>
where
    F: Fn(&Request, Response) -> Result<Response> + Send + Sync + 'static,
{
    ResponseFn(f)
}

impl<F> ResponseFilter for ResponseFn<F>
where
    F: Fn(&Request, Response) -> Result<Response> + Send + Sync,
{
    fn on_response(&self, req: &Request, res: Response) -> Result<Response> {
        (self.0)(req, res)
    }
}

/// Closure-backed [`AroundFilter`]. Built by [`around_fn`].
pub struct AroundFn<F>(F);

/// Wrap an async closure as an around filter.
pub fn around_fn<F, Fut>(f: F) -> AroundFn<F>
where
    F: Fn(Continuation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    AroundFn(f)
}

#[async_trait]
impl<F, Fut> AroundFilter for AroundFn<F>
where
    F: Fn(Continuation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn filter(&self, cont: Continuation) -> Result<Response> {
        (self.0)(cont).await
    }
}

/// Closure-backed [`BlockingAroundFilter`]. Built by [`blocking_around_fn`].
pub struct BlockingAroundFn<F>(F);

/// Wrap a synchronous closure as a blocking around filter.
pub fn blocking_around_fn<F>(f: F) -> BlockingAroundFn<F>
where
    F: Fn(Continuation) -> Result<Response> + Send + Sync + 'static,
{
    BlockingAroundFn(f)
}

impl<F> BlockingAroundFilter for BlockingAroundFn<F>
where
    F: Fn(Continuation) -> Result<Response> + Send + Sync,
{
    fn filter(&self, cont: Continuation) -> Result<Response> {
        (self.0)(cont)
    }
}

/// The callable behind an entry. The shape is fixed at registration.
#[derive(Clone)]
pub(crate) enum Invoke {
    Request(Arc<dyn RequestFilter>),
    Response(Arc<dyn ResponseFilter>),
    Around(Arc<dyn AroundFilter>),
    BlockingAround(Arc<dyn BlockingAroundFilter>),
}

/// A filter plus the rules that select and order it.
///
/// Entries are immutable once registered.
#[derive(Clone)]
pub struct FilterEntry {
    name: String,
    sources: Vec<String>,
    style: PatternStyle,
    patterns: Vec<PathPattern>,
    methods: Vec<Method>,
    order: i32,
    execute_on: ExecuteOn,
    invoke: Invoke,
    index: usize,
}

impl FilterEntry {
    fn with_invoke(name: &str, invoke: Invoke) -> Self {
        Self {
            name: name.to_string(),
            sources: Vec::new(),
            style: PatternStyle::Ant,
            patterns: Vec::new(),
            methods: Vec::new(),
            order: 0,
            execute_on: ExecuteOn::EventLoop,
            invoke,
            index: 0,
        }
    }

    /// A request filter, matching every path and method at order 0.
    pub fn request<F: RequestFilter + 'static>(filter: F) -> Self {
        let name = filter.name();
        Self::with_invoke(name, Invoke::Request(Arc::new(filter)))
    }

    /// A response filter.
    pub fn response<F: ResponseFilter + 'static>(filter: F) -> Self {
        let name = filter.name();
        Self::with_invoke(name, Invoke::Response(Arc::new(filter)))
    }

    /// An async around filter. It always runs on the event loop.
    pub fn around<F: AroundFilter + 'static>(filter: F) -> Self {
        let name = filter.name();
        Self::with_invoke(name, Invoke::Around(Arc::new(filter)))
    }

    /// A synchronous around filter run on the blocking pool.
    pub fn around_blocking<F: BlockingAroundFilter + 'static>(filter: F) -> Self {
        let name = filter.name();
        let mut entry = Self::with_invoke(name, Invoke::BlockingAround(Arc::new(filter)));
        entry.execute_on = ExecuteOn::Blocking;
        entry
    }

    /// Set the name used in logs and metrics.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a path pattern. Without any pattern the entry matches all paths.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.sources.push(pattern.into());
        self
    }

    /// Add several path patterns; any of them selects the entry.
    pub fn patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Set the pattern syntax for all patterns of this entry.
    pub fn style(mut self, style: PatternStyle) -> Self {
        self.style = style;
        self
    }

    /// Restrict to one more HTTP method. Without any the entry matches all methods.
    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn methods<I: IntoIterator<Item = Method>>(mut self, methods: I) -> Self {
        self.methods.extend(methods);
        self
    }

    /// Lower runs first on the way in and last on the way out.
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Run the body on the blocking pool.
    ///
    /// Has no effect on async around filters.
    pub fn blocking(mut self) -> Self {
        if !matches!(self.invoke, Invoke::Around(_)) {
            self.execute_on = ExecuteOn::Blocking;
        }
        self
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_order(&self) -> i32 {
        self.order
    }

    /// Registration index, assigned by the registry.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn execute_on(&self) -> ExecuteOn {
        self.execute_on
    }

    pub fn kind(&self) -> FilterKind {
        match self.invoke {
            Invoke::Request(_) => FilterKind::Request,
            Invoke::Response(_) => FilterKind::Response,
            Invoke::Around(_) | Invoke::BlockingAround(_) => FilterKind::Around,
        }
    }

    /// Patterns as written.
    pub fn pattern_sources(&self) -> &[String] {
        &self.sources
    }

    pub(crate) fn invoke(&self) -> &Invoke {
        &self.invoke
    }

    /// Compile patterns and stamp the registration index.
    pub(crate) fn prepare(&mut self, index: usize) -> Result<()> {
        self.patterns = self
            .sources
            .iter()
            .map(|p| PathPattern::compile(p, self.style))
            .collect::<Result<_>>()?;
        self.index = index;
        Ok(())
    }

    /// True if this entry applies to `path` (already split) and `method`.
    pub(crate) fn selects(&self, segments: &[&str], path: &str, method: &Method) -> bool {
        let method_ok = self.methods.is_empty() || self.methods.contains(method);
        let path_ok = self.patterns.is_empty()
            || self.patterns.iter().any(|p| p.matches_split(segments, path));
        method_ok && path_ok
    }
}

impl fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterEntry")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("patterns", &self.sources)
            .field("methods", &self.methods)
            .field("order", &self.order)
            .field("execute_on", &self.execute_on)
            .finish()
    }
}
