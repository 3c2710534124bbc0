//! Prometheus metrics for update-server observability.

use metrics::{counter, gauge, histogram};

/// Initialize metrics exporter (Prometheus).
pub fn init_metrics() {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record a published entity-change event.
pub fn event_published(kind: &str) {
    counter!("update_events_published_total", "kind" => kind.to_string()).increment(1);
}

/// Record a panicking event handler.
pub fn event_handler_panicked(subscriber: &str) {
    counter!("update_event_handler_panics_total", "subscriber" => subscriber.to_string())
        .increment(1);
}

/// Record a rollout state transition.
pub fn rollout_status_changed(state: &str) {
    counter!("update_rollouts_total", "state" => state.to_string()).increment(1);
}

/// Record an action state transition.
pub fn action_status_changed(state: &str) {
    counter!("update_actions_total", "state" => state.to_string()).increment(1);
}

/// Record an auto-assignment created by the background sweep.
pub fn auto_assignment_created() {
    counter!("update_auto_assignments_total").increment(1);
}

/// Record the duration of one rollout executor sweep.
pub fn rollout_sweep_duration(duration_ms: u64) {
    histogram!("update_rollout_sweep_duration_ms").record(duration_ms as f64);
}

/// Record the duration of one auto-assign sweep.
pub fn auto_assign_sweep_duration(duration_ms: u64) {
    histogram!("update_auto_assign_sweep_duration_ms").record(duration_ms as f64);
}

/// Set the number of rollouts currently in a running state.
pub fn active_rollouts(count: usize) {
    gauge!("update_active_rollouts").set(count as f64);
}
