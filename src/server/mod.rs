//! HTTP transport in front of the filter chain.
//!
//! The server owns the listener and translates between hyper requests and
//! chain requests. Everything between accepting a request and writing the
//! response is the executor's job.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filter_chain::{handler_fn, BlockingPool, FilterChainExecutor, FilterRegistry, Response, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(BlockingPool::new(4, "blocking")?);
//!     let handler = Arc::new(handler_fn(|_req| async { Ok(Response::ok("hi")) }));
//!     let executor = FilterChainExecutor::new(FilterRegistry::new(), handler, pool);
//!
//!     let server = Server::bind("127.0.0.1:8080".parse()?, Arc::new(executor)).await?;
//!     server.serve(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//!     Ok(())
//! }
//! ```

mod connection;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::core::{Error, Response};
use crate::filter::FilterChainExecutor;
use crate::metrics::ChainMetrics;
use crate::pool::PoolError;

use connection::ConnectionContext;
pub use connection::REMOTE_ADDR;

/// HTTP server running every request through a [`FilterChainExecutor`].
pub struct Server {
    listener: TcpListener,
    executor: Arc<FilterChainExecutor>,
    metrics: Option<Arc<ChainMetrics>>,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind the listener. Port 0 picks a free port; see [`Server::local_addr`].
    pub async fn bind(addr: SocketAddr, executor: Arc<FilterChainExecutor>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            executor,
            metrics: None,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Serve `GET /metrics` from `metrics`, outside the filter chain.
    pub fn with_metrics(mut self, metrics: Arc<ChainMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the live connection count, usable after `serve` consumed the server.
    pub fn connections(&self) -> ActiveConnections {
        ActiveConnections(Arc::clone(&self.active))
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Connections already accepted keep running; use
    /// [`ActiveConnections::wait_for_drain`] to wait for them.
    pub async fn serve<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.listener.local_addr()?;
        info!(addr = %addr, "listening");

        let ctx = Arc::new(ConnectionContext {
            executor: self.executor,
            metrics: self.metrics,
            active: self.active,
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, remote_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!(error = %e, "accept error");
                            continue;
                        }
                    };

                    let _ = stream.set_nodelay(true);

                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        ctx.handle_connection(stream, remote_addr).await;
                    });
                }
                _ = &mut shutdown => {
                    debug!("shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Count of connections currently being served.
#[derive(Clone)]
pub struct ActiveConnections(Arc<AtomicUsize>);

impl ActiveConnections {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    /// Wait until every connection closed.
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

/// Map a chain error that no filter recovered into the response sent to the client.
///
/// Overload and cancellation become 503. Everything else is a 500 with a
/// generic body; details stay in the logs.
pub fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::Cancelled
        | Error::Pool(PoolError::QueueFull { .. })
        | Error::Pool(PoolError::Shutdown) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    Response::builder()
        .status(status)
        .text()
        .body(status.canonical_reason().unwrap_or("Error"))
        .build()
}
