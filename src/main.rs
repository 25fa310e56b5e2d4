use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use tracing::{error, info};

use filter_chain::config::Config;
use filter_chain::filters::AccessLog;
use filter_chain::{
    around_fn, handler_fn, logging, request_fn, response_fn, BlockingPool, ChainMetrics,
    Continuation, FilterChainExecutor, FilterEntry, FilterRegistry, FilterResult, Request,
    Response, Server,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn main() -> Result<(), BoxError> {
    let config = Config::from_env()?;

    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    info!("Starting filter_chain {}", filter_chain::VERSION);
    config.log_summary();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.pool.event_loop_workers())
        .thread_name("event-loop")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

async fn async_main(config: Config) -> Result<(), BoxError> {
    let pool = Arc::new(BlockingPool::with_capacity(
        config.pool.blocking_workers(),
        config.pool.queue_capacity(),
        "blocking",
    )?);

    let mut registry = FilterRegistry::new();
    if config.server.access_log {
        registry.register(AccessLog::entry(config.logging.service_name.clone()))?;
    }
    register_demo_filters(&mut registry)?;

    let handler = Arc::new(handler_fn(|req: Request| async move {
        Ok(Response::ok(format!("{} {}\n", req.method(), req.path())))
    }));

    let mut executor = FilterChainExecutor::new(registry, handler, Arc::clone(&pool))
        .with_config(config.chain.clone());

    let metrics = if config.server.metrics {
        let metrics = Arc::new(ChainMetrics::new()?);
        executor = executor.with_metrics(Arc::clone(&metrics));
        Some(metrics)
    } else {
        None
    };

    let mut server = Server::bind(config.server.listen_addr, Arc::new(executor)).await?;
    if let Some(metrics) = metrics {
        server = server.with_metrics(metrics);
    }
    let connections = server.connections();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("Shutting down...");
    };
    server.serve(shutdown).await?;

    if !connections.wait_for_drain(Duration::from_secs(5)).await {
        info!(remaining = connections.count(), "drain timeout reached");
    }
    pool.shutdown();

    Ok(())
}

fn register_demo_filters(registry: &mut FilterRegistry) -> filter_chain::Result<()> {
    registry.register(
        FilterEntry::request(request_fn(|req: Request| {
            if req.header("authorization").is_some() {
                Ok(FilterResult::Next(req))
            } else {
                Ok(FilterResult::Stop(
                    Response::empty(StatusCode::UNAUTHORIZED).with_body("Unauthorized\n"),
                ))
            }
        }))
        .name("auth")
        .pattern("/admin/**")
        .order(-100),
    )?;

    registry.register(
        FilterEntry::around(around_fn(|mut cont: Continuation| async move {
            let started = Instant::now();
            let res = cont.proceed_async().await?;
            Ok(res.with_header(
                "x-response-time",
                format!("{}us", started.elapsed().as_micros()),
            ))
        }))
        .name("timing"),
    )?;

    registry.register(
        FilterEntry::response(response_fn(|_req: &Request, res: Response| {
            Ok(res.with_header("server", "filter_chain"))
        }))
        .name("server_header")
        .order(100),
    )?;

    Ok(())
}
