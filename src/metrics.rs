use std::sync::Arc;
use tracing::{error, info};

use axum::{Router, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

use crate::models::definitions::DefinitionId;
use crate::models::errors::ErrorClass;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,

    // Scan metrics
    pub windows_committed: Counter<u64>,
    pub users_extracted: Counter<u64>,
    pub definition_checkpoint: Gauge<u64>,
    pub definitions_failed: Counter<u64>,

    // Chain metrics
    pub chain_head_block: Gauge<u64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricError> {
        // Create a new prometheus registry
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        // Set up a meter to create instruments
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("indexer_metrics");

        let windows_committed = meter
            .u64_counter("indexer_windows_committed")
            .with_description("Total number of block windows committed")
            .build();

        let users_extracted = meter
            .u64_counter("indexer_users_extracted")
            .with_description("User addresses committed, deduplicated within each window")
            .build();

        let definition_checkpoint = meter
            .u64_gauge("indexer_definition_checkpoint")
            .with_description("Last block fully indexed per definition")
            .build();

        let definitions_failed = meter
            .u64_counter("indexer_definitions_failed")
            .with_description("Definitions that stopped early, by failure class")
            .build();

        let chain_head_block = meter
            .u64_gauge("indexer_chain_head_block_number")
            .with_description("Latest block number on chain at the start of the run")
            .build();

        let rpc_requests = meter
            .u64_counter("indexer_rpc_requests")
            .with_description("Number of RPC requests made")
            .build();

        let rpc_errors = meter
            .u64_counter("indexer_rpc_errors")
            .with_description("Number of RPC errors encountered")
            .build();

        let rpc_latency = meter
            .f64_histogram("indexer_rpc_latency")
            .with_description("RPC request latency")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0,
            ])
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            windows_committed,
            users_extracted,
            definition_checkpoint,
            definitions_failed,
            chain_head_block,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    pub fn record_window(&self, definition_id: DefinitionId, checkpoint: u64, users: usize) {
        let labels = [KeyValue::new("definition_id", definition_id)];
        self.windows_committed.add(1, &labels);
        self.users_extracted.add(users as u64, &labels);
        self.definition_checkpoint.record(checkpoint, &labels);
    }

    pub fn record_chain_head(&self, head: u64) {
        self.chain_head_block.record(head, &[]);
    }

    pub fn record_failure(&self, class: ErrorClass) {
        self.definitions_failed
            .add(1, &[KeyValue::new("class", class.as_str())]);
    }

    pub fn record_rpc(&self, method: &'static str, elapsed_secs: f64, is_error: bool) {
        let labels = [KeyValue::new("method", method)];
        self.rpc_requests.add(1, &labels);
        self.rpc_latency.record(elapsed_secs, &labels);
        if is_error {
            self.rpc_errors.add(1, &labels);
        }
    }

    pub fn render(&self) -> String {
        render_registry(&self.registry)
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> anyhow::Result<()> {
        let addr = format!("{addr}:{port}").parse::<SocketAddr>()?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;

        // Spawn the server in a separate task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> String {
    render_registry(&registry)
}

fn render_registry(registry: &prometheus::Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
