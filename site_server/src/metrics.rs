//! Prometheus metrics for the build worker.
//!
//! Build lifecycle metrics are recorded by the engine itself; this module
//! installs the exporter and adds the transport-level counters.

use metrics::counter;

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a worker callback and how it was answered.
pub fn task_received(outcome: &str) {
    counter!("site_build_tasks_received_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a build task the in-process worker put back on its queue.
pub fn task_requeued() {
    counter!("site_build_tasks_requeued_total").increment(1);
}
