//! Prometheus metric names the engine, sink writer, and worker supervisor
//! emit under (spec §6). Centralizing the names here (rather than
//! inlining string literals at each call site) keeps the exported series
//! stable even as callers are refactored.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and returns a handle whose
/// `render()` backs the `/metrics` endpoint.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_all();
    Ok(handle)
}

fn describe_all() {
    metrics::describe_counter!(
        "hermod_engine_messages_processed_total",
        "Messages for which every configured sink reported success and Source.Ack was called"
    );
    metrics::describe_counter!(
        "hermod_engine_messages_filtered_total",
        "Messages dropped by a transform returning a nil output"
    );
    metrics::describe_counter!(
        "hermod_engine_message_errors_total",
        "Messages that failed at a named pipeline stage"
    );
    metrics::describe_counter!(
        "hermod_engine_sink_writes_total",
        "Successful writes per sink"
    );
    metrics::describe_counter!(
        "hermod_engine_sink_write_errors_total",
        "Failed write attempts per sink"
    );
    metrics::describe_histogram!(
        "hermod_engine_processing_duration_seconds",
        "End-to-end per-message processing latency"
    );
    metrics::describe_counter!(
        "hermod_engine_dead_letter_total",
        "Messages routed to a dead-letter sink"
    );
    metrics::describe_counter!("hermod_lease_acquire_total", "Successful lease acquisitions");
    metrics::describe_counter!(
        "hermod_lease_steal_total",
        "Leases acquired from a previous owner past expiry"
    );
    metrics::describe_counter!(
        "hermod_lease_renew_errors_total",
        "Failed lease renewal attempts"
    );
    metrics::describe_gauge!(
        "hermod_worker_leases_owned_total",
        "Workflows this worker currently owns a live lease for"
    );
    metrics::describe_histogram!(
        "hermod_worker_sync_duration_seconds",
        "Duration of one supervisor reconcile tick"
    );
    metrics::describe_gauge!(
        "hermod_worker_active_workflows_total",
        "Engines currently running on this worker"
    );
    metrics::describe_counter!(
        "hermod_worker_sync_errors_total",
        "Reconcile ticks that failed to complete"
    );
}

pub fn messages_processed() {
    metrics::counter!("hermod_engine_messages_processed_total").increment(1);
}

pub fn messages_filtered() {
    metrics::counter!("hermod_engine_messages_filtered_total").increment(1);
}

pub fn message_error(stage: &'static str) {
    metrics::counter!("hermod_engine_message_errors_total", "stage" => stage).increment(1);
}

pub fn sink_write(sink_id: &str) {
    metrics::counter!("hermod_engine_sink_writes_total", "sink_id" => sink_id.to_string())
        .increment(1);
}

pub fn sink_write_error(sink_id: &str) {
    metrics::counter!("hermod_engine_sink_write_errors_total", "sink_id" => sink_id.to_string())
        .increment(1);
}

pub fn processing_duration(seconds: f64) {
    metrics::histogram!("hermod_engine_processing_duration_seconds").record(seconds);
}

pub fn dead_letter() {
    metrics::counter!("hermod_engine_dead_letter_total").increment(1);
}

pub fn lease_acquire() {
    metrics::counter!("hermod_lease_acquire_total").increment(1);
}

pub fn lease_steal() {
    metrics::counter!("hermod_lease_steal_total").increment(1);
}

pub fn lease_renew_error() {
    metrics::counter!("hermod_lease_renew_errors_total").increment(1);
}

pub fn worker_leases_owned(count: u64) {
    metrics::gauge!("hermod_worker_leases_owned_total").set(count as f64);
}

pub fn worker_sync_duration(seconds: f64) {
    metrics::histogram!("hermod_worker_sync_duration_seconds").record(seconds);
}

pub fn worker_active_workflows(count: u64) {
    metrics::gauge!("hermod_worker_active_workflows_total").set(count as f64);
}

pub fn worker_sync_error() {
    metrics::counter!("hermod_worker_sync_errors_total").increment(1);
}
