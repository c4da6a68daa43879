//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Exchange history download
    Fetch,
}

/// Counter metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMetric {
    /// Chunks found missing by the planner
    ChunksPlanned,
    /// Chunks that committed rows
    ChunksWritten,
    /// Chunks with nothing new to commit
    ChunksSkipped,
    /// Bar rows committed
    RowsWritten,
    /// Writers recreated after a failed write
    WriteRetries,
}

impl CounterMetric {
    pub fn name(&self) -> &'static str {
        match self {
            CounterMetric::ChunksPlanned => "bundle_chunks_planned_total",
            CounterMetric::ChunksWritten => "bundle_chunks_written_total",
            CounterMetric::ChunksSkipped => "bundle_chunks_skipped_total",
            CounterMetric::RowsWritten => "bundle_rows_written_total",
            CounterMetric::WriteRetries => "bundle_write_retries_total",
        }
    }
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    let metric_name = match metric {
        LatencyMetric::Fetch => "bundle_fetch_latency_ms",
    };

    let value_ms = duration.as_secs_f64() * 1000.0;
    ::metrics::histogram!(metric_name).record(value_ms);
    tracing::trace!(metric = metric_name, value_ms, "Recording latency");
}

/// Increment a counter
pub fn increment_counter(metric: CounterMetric, value: u64) {
    ::metrics::counter!(metric.name()).increment(value);
}

/// Serve Prometheus metrics over HTTP on `port`
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to start metrics exporter: {}", e))?;

    tracing::info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}
