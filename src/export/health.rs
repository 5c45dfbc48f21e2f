use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, Gauge, Histogram, HistogramOpts, Encoder, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Prometheus metrics for collector health and observability.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Measurements received from the ingestion engines.
    pub measurements_ingested: Counter,
    /// Measurements handed to outputs after the processor chain.
    pub measurements_emitted: Counter,
    /// Ingestion errors reported through the accumulator.
    pub ingest_errors: Gauge,
    /// Processor chain invocations.
    pub batches_processed: Counter,
    /// Batch size entering the chain.
    pub batch_size: Histogram,
    /// Processor chain latency in seconds.
    pub chain_duration: Histogram,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let measurements_ingested = Counter::with_opts(
            Opts::new(
                "measurements_ingested_total",
                "Measurements received from the ingestion engines.",
            )
            .namespace("rtcollect"),
        )?;
        let measurements_emitted = Counter::with_opts(
            Opts::new(
                "measurements_emitted_total",
                "Measurements handed to outputs after the processor chain.",
            )
            .namespace("rtcollect"),
        )?;
        let ingest_errors = Gauge::with_opts(
            Opts::new(
                "ingest_errors",
                "Ingestion errors reported through the accumulator.",
            )
            .namespace("rtcollect"),
        )?;
        let batches_processed = Counter::with_opts(
            Opts::new("batches_processed_total", "Processor chain invocations.")
                .namespace("rtcollect"),
        )?;
        let batch_size = Histogram::with_opts(
            HistogramOpts::new("batch_size", "Batch size entering the chain.")
                .namespace("rtcollect")
                .buckets(vec![1.0, 10.0, 100.0, 500.0, 1000.0, 5000.0]),
        )?;
        let chain_duration = Histogram::with_opts(
            HistogramOpts::new("chain_duration_seconds", "Processor chain latency.")
                .namespace("rtcollect")
                .buckets(vec![0.0001, 0.001, 0.01, 0.1, 1.0]),
        )?;

        registry.register(Box::new(measurements_ingested.clone()))?;
        registry.register(Box::new(measurements_emitted.clone()))?;
        registry.register(Box::new(ingest_errors.clone()))?;
        registry.register(Box::new(batches_processed.clone()))?;
        registry.register(Box::new(batch_size.clone()))?;
        registry.register(Box::new(chain_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            measurements_ingested,
            measurements_emitted,
            ingest_errors,
            batches_processed,
            batch_size,
            chain_duration,
        })
    }

    /// Bind the listener and serve /metrics and /healthz until stopped.
    pub async fn start(&self) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(|| async { "ok" }))
            .with_state(self.registry.clone());

        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("binding health listener on {}", self.addr))?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        info!(addr = %self.addr, "health metrics server listening");

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await;
        });

        Ok(())
    }

    /// Shut the server down.
    pub async fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    let families = registry.gather();
    let mut buf = Vec::new();

    match TextEncoder::new().encode(&families, &mut buf) {
        Ok(()) => (StatusCode::OK, buf).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encoding metrics: {e}"),
        )
            .into_response(),
    }
}
