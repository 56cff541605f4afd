use anyhow::{Context, Result};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::SdkMeterProvider, Resource};
use std::time::Duration;
use tracing::info;

/// Bridge telemetry instruments
pub struct BridgeMetrics {
    // Session lifecycle
    pub sessions_opened: Counter<u64>,
    pub sessions_evicted: Counter<u64>,

    // RPC traffic
    pub rpc_calls: Counter<u64>,

    // Diff review
    pub diff_resolutions: Counter<u64>,
    pub diff_review_latency: Histogram<f64>,

    // Context fan-out
    pub context_broadcasts: Counter<u64>,
    pub context_skips: Counter<u64>,
}

impl BridgeMetrics {
    pub fn new(meter: &Meter) -> Self {
        let sessions_opened = meter
            .u64_counter("ide_bridge.sessions.opened")
            .with_description("Streaming sessions opened")
            .build();

        let sessions_evicted = meter
            .u64_counter("ide_bridge.sessions.evicted")
            .with_description("Sessions evicted because their queue overflowed")
            .build();

        let rpc_calls = meter
            .u64_counter("ide_bridge.rpc.calls")
            .with_description("JSON-RPC requests by method and outcome")
            .build();

        let diff_resolutions = meter
            .u64_counter("ide_bridge.diff.resolutions")
            .with_description("Diff reviews resolved by outcome")
            .build();

        let diff_review_latency = meter
            .f64_histogram("ide_bridge.diff.review_latency_ms")
            .with_description("Time from openDiff to resolution in milliseconds")
            .build();

        let context_broadcasts = meter
            .u64_counter("ide_bridge.context.broadcasts")
            .with_description("Workspace context updates fanned out")
            .build();

        let context_skips = meter
            .u64_counter("ide_bridge.context.skips")
            .with_description("Workspace context updates suppressed")
            .build();

        Self {
            sessions_opened,
            sessions_evicted,
            rpc_calls,
            diff_resolutions,
            diff_review_latency,
            context_broadcasts,
            context_skips,
        }
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.add(1, &[]);
    }

    pub fn record_session_evicted(&self) {
        self.sessions_evicted.add(1, &[]);
    }

    pub fn record_rpc(&self, method: &str, outcome: &str) {
        self.rpc_calls.add(
            1,
            &[
                KeyValue::new("method", method.to_string()),
                KeyValue::new("outcome", outcome.to_string()),
            ],
        );
    }

    pub fn record_diff_resolution(&self, outcome: &str, latency_ms: f64) {
        let attrs = [KeyValue::new("outcome", outcome.to_string())];
        self.diff_resolutions.add(1, &attrs);
        self.diff_review_latency.record(latency_ms, &attrs);
    }

    /// Record one fan-out and how many sessions it reached
    pub fn record_context_broadcast(&self, delivered: usize) {
        self.context_broadcasts.add(
            1,
            &[KeyValue::new("delivered", delivered.to_string())],
        );
    }

    pub fn record_context_skip(&self, reason: &str) {
        self.context_skips
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }
}

/// Install the OTLP/HTTP meter provider and build the bridge instruments
pub fn init_metrics(endpoint: &str, service_name: &str) -> Result<(SdkMeterProvider, BridgeMetrics)> {
    info!(%endpoint, "initializing OTLP metrics");

    let export_config = opentelemetry_otlp::ExportConfig {
        endpoint: Some(endpoint.to_string()),
        timeout: Duration::from_secs(10),
        ..Default::default()
    };

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_export_config(export_config)
        .build()
        .context("building OTLP metric exporter")?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(
        exporter,
        opentelemetry_sdk::runtime::Tokio,
    )
    .with_interval(Duration::from_secs(30))
    .build();

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());

    let meter = global::meter("ide-bridge");
    Ok((provider, BridgeMetrics::new(&meter)))
}

pub fn shutdown_metrics(provider: SdkMeterProvider) -> Result<()> {
    info!("flushing OTLP metrics");
    provider
        .shutdown()
        .context("shutting down meter provider")?;
    Ok(())
}
