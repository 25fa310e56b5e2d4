//! Per-connection serving and hyper ↔ chain request conversion.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::core::{Request, Response};
use crate::filter::FilterChainExecutor;
use crate::metrics::ChainMetrics;

use super::error_response;

/// Request attribute holding the peer address.
pub const REMOTE_ADDR: &str = "remote_addr";

pub(crate) struct ConnectionContext {
    pub(crate) executor: Arc<FilterChainExecutor>,
    pub(crate) metrics: Option<Arc<ChainMetrics>>,
    pub(crate) active: Arc<AtomicUsize>,
}

/// Decrements the connection count when the connection task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(active))
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ConnectionContext {
    pub(crate) async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
    ) {
        let _guard = ConnectionGuard::new(&self.active);

        let ctx = Arc::clone(&self);
        let service = service_fn(move |req| {
            let ctx = Arc::clone(&ctx);
            async move { ctx.handle_request(req, remote_addr).await }
        });

        let io = TokioIo::new(stream);
        if let Err(err) = auto::Builder::new(TokioExecutor::new())
            .http1()
            .timer(TokioTimer::new())
            .keep_alive(true)
            .http2()
            .max_concurrent_streams(250)
            .serve_connection(io, service)
            .await
        {
            debug!(remote = %remote_addr, error = ?err, "connection error");
        }
    }

    async fn handle_request(
        &self,
        req: hyper::Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Result<hyper::Response<Full<Bytes>>, Infallible> {
        if let Some(metrics) = &self.metrics {
            if req.method() == Method::GET && req.uri().path() == "/metrics" {
                metrics.observe_pool(self.executor.pool());
                return Ok(metrics_response(metrics));
            }
        }

        let request = match into_chain_request(req, remote_addr).await {
            Ok(request) => request,
            Err(e) => {
                debug!(remote = %remote_addr, error = %e, "failed to read request body");
                return Ok(into_hyper_response(
                    Response::empty(StatusCode::BAD_REQUEST).with_body("Bad Request"),
                ));
            }
        };

        // hyper drops this future when the client goes away. The guard turns
        // that into cancellation for the spawned chain, and on normal
        // completion stops any downstream work a filter detached.
        let cancel = CancellationToken::new();
        let _guard = cancel.clone().drop_guard();

        let executor = Arc::clone(&self.executor);
        let run = tokio::spawn(async move { executor.execute_with_cancel(request, cancel).await });

        let response = match run.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => error_response(&e),
            Err(e) => {
                error!(error = %e, "chain task failed");
                Response::internal_error("Internal Server Error")
            }
        };

        Ok(into_hyper_response(response))
    }
}

/// Buffer the body and build the chain request.
async fn into_chain_request(
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> Result<Request, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();

    let mut request = Request::new(parts.method, parts.uri, parts.headers, body);
    request.set_version(parts.version);
    request.set_attribute(REMOTE_ADDR, remote_addr);
    Ok(request)
}

fn into_hyper_response(response: Response) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = http::Response::<Bytes>::from(response).into_parts();
    hyper::Response::from_parts(parts, Full::new(body))
}

fn metrics_response(metrics: &ChainMetrics) -> hyper::Response<Full<Bytes>> {
    let response = Response::ok(metrics.export())
        .with_header("content-type", "text/plain; version=0.0.4");
    into_hyper_response(response)
}
