//! Prometheus metrics for the filter chain.
//!
//! Owned by the application and handed to the executor; nothing here is
//! global.

use std::time::Duration;

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::pool::BlockingPool;

/// Chain outcome metrics.
pub struct ChainMetrics {
    registry: Registry,

    /// Requests by outcome: ok, error, cancelled
    pub requests_total: CounterVec,

    /// Time from resolution to final response or error
    pub request_duration_seconds: HistogramVec,

    /// Short-circuits by filter name
    pub short_circuits_total: CounterVec,

    /// Failed requests by error kind
    pub errors_total: CounterVec,

    /// Jobs waiting in the blocking pool queue
    pub blocking_queue_depth: Gauge,
}

impl ChainMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Latency buckets (in seconds)
        let buckets = vec![
            0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ];

        let requests_total = CounterVec::new(
            Opts::new("filter_chain_requests_total", "Requests run through the chain"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "filter_chain_request_duration_seconds",
                "Chain execution time in seconds",
            )
            .buckets(buckets),
            &["outcome"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let short_circuits_total = CounterVec::new(
            Opts::new(
                "filter_chain_short_circuits_total",
                "Requests answered by a filter without reaching the handler",
            ),
            &["filter"],
        )?;
        registry.register(Box::new(short_circuits_total.clone()))?;

        let errors_total = CounterVec::new(
            Opts::new("filter_chain_errors_total", "Failed requests by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let blocking_queue_depth = Gauge::new(
            "filter_chain_blocking_queue_depth",
            "Jobs waiting for a blocking worker",
        )?;
        registry.register(Box::new(blocking_queue_depth.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            short_circuits_total,
            errors_total,
            blocking_queue_depth,
        })
    }

    pub fn record_request(&self, outcome: &str, elapsed: Duration) {
        self.requests_total.with_label_values(&[outcome]).inc();
        self.request_duration_seconds
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_short_circuit(&self, filter: &str) {
        self.short_circuits_total.with_label_values(&[filter]).inc();
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total.with_label_values(&[kind]).inc();
    }

    /// Sample the blocking pool queue.
    pub fn observe_pool(&self, pool: &BlockingPool) {
        self.blocking_queue_depth.set(pool.pending_count() as f64);
    }

    /// Render all metrics in Prometheus text format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
