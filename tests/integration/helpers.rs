//! Test helpers and utilities

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filter_chain::{
    handler_fn, BlockingPool, FilterChainExecutor, FilterRegistry, Request, Response,
    ResponseProducer, Server,
};
use reqwest::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub fn pool() -> Arc<BlockingPool> {
    Arc::new(BlockingPool::with_capacity(2, 32, "it-blocking").expect("Failed to start pool"))
}

pub fn request(path: &str) -> Request {
    Request::get(path.parse().expect("invalid test uri"))
}

/// Handler answering with the request path, counting its calls.
pub fn counting_echo() -> (Arc<dyn ResponseProducer>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = handler_fn(move |req: Request| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Response::ok(req.path().to_string())) }
    });
    (Arc::new(handler), calls)
}

pub fn executor(registry: FilterRegistry) -> (FilterChainExecutor, Arc<AtomicUsize>) {
    let (handler, calls) = counting_echo();
    (FilterChainExecutor::new(registry, handler, pool()), calls)
}

/// Shared ordered event log.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

#[allow(dead_code)]
impl Trace {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// In-process server on an ephemeral loopback port.
pub struct TestServer {
    pub base_url: String,
    pub client: Client,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn start(server: Server) -> Self {
        let addr: SocketAddr = server.local_addr().expect("no local addr");
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            server.serve(async move { token.cancelled().await }).await
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: format!("http://{}", addr),
            client,
            shutdown,
            handle,
        }
    }

    pub async fn bind(executor: FilterChainExecutor) -> Self {
        let server = Server::bind("127.0.0.1:0".parse().unwrap(), Arc::new(executor))
            .await
            .expect("Failed to bind test server");
        Self::start(server).await
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("GET request failed")
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle
            .await
            .expect("server task panicked")
            .expect("server returned an error");
    }
}
