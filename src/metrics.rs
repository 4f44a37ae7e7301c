// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Task intake and coalescing
//! - Batch flushes and exchange latency
//! - Classification results and network failures
//! - Terminal task states, expiry, self-healing and adoption
//! - Client lifecycle state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `peer_replication_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use peer_replication::metrics;
//! use std::time::Duration;
//!
//! metrics::record_batch_flush("peer-1", "size", 250);
//! metrics::record_exchange_latency("peer-1", "batch", Duration::from_millis(12));
//! ```

use crate::processor::ProcessingResult;
use crate::task::{Action, ProcessingState};
use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Intake
// =============================================================================

/// Record a task accepted by a client.
pub fn record_task_submitted(peer_id: &str, action: Action) {
    counter!(
        "peer_replication_tasks_submitted_total",
        "peer_id" => peer_id.to_string(),
        "action" => action.as_str()
    )
    .increment(1);
}

/// Record a waiting task replaced by a newer one with the same id.
pub fn record_task_superseded(peer_id: &str) {
    counter!("peer_replication_tasks_superseded_total", "peer_id" => peer_id.to_string()).increment(1);
}

/// Current number of tasks waiting in a peer's queue.
pub fn set_queue_depth(peer_id: &str, depth: usize) {
    gauge!("peer_replication_queue_depth", "peer_id" => peer_id.to_string()).set(depth as f64);
}

// =============================================================================
// Exchanges
// =============================================================================

/// Record a batch leaving the queue, with why it was flushed.
pub fn record_batch_flush(peer_id: &str, reason: &str, size: usize) {
    let peer = peer_id.to_string();
    counter!(
        "peer_replication_batches_flushed_total",
        "peer_id" => peer.clone(),
        "reason" => reason.to_string()
    )
    .increment(1);
    histogram!("peer_replication_batch_size", "peer_id" => peer).record(size as f64);
}

/// Record the duration of one network exchange (`batch` or `single`).
pub fn record_exchange_latency(peer_id: &str, path: &str, duration: Duration) {
    histogram!(
        "peer_replication_exchange_duration_seconds",
        "peer_id" => peer_id.to_string(),
        "path" => path.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record the classification of one exchange.
pub fn record_processing_result(peer_id: &str, path: &str, result: ProcessingResult) {
    counter!(
        "peer_replication_processing_results_total",
        "peer_id" => peer_id.to_string(),
        "path" => path.to_string(),
        "result" => result.as_str()
    )
    .increment(1);
}

/// Record one network-layer failure.
pub fn record_network_failure(peer_id: &str) {
    counter!("peer_replication_network_failures_total", "peer_id" => peer_id.to_string()).increment(1);
}

/// Current consecutive network failures for a peer.
pub fn set_consecutive_failures(peer_id: &str, count: u32) {
    gauge!("peer_replication_consecutive_network_failures", "peer_id" => peer_id.to_string())
        .set(count as f64);
}

/// Record a fire-and-forget prime-connection heartbeat.
pub fn record_prime_heartbeat(peer_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "peer_replication_prime_heartbeats_total",
        "peer_id" => peer_id.to_string(),
        "status" => status
    )
    .increment(1);
}

// =============================================================================
// Task Outcomes
// =============================================================================

/// Record a task reaching a terminal state.
pub fn record_task_terminal(peer_id: &str, action: Action, state: ProcessingState) {
    counter!(
        "peer_replication_tasks_terminal_total",
        "peer_id" => peer_id.to_string(),
        "action" => action.as_str(),
        "state" => state.as_str()
    )
    .increment(1);
}

/// Record tasks that expired before being sent.
pub fn record_tasks_expired(peer_id: &str, count: usize) {
    counter!("peer_replication_tasks_expired_total", "peer_id" => peer_id.to_string())
        .increment(count as u64);
}

/// Record retry-pending tasks dropped at shutdown.
pub fn record_tasks_discarded(peer_id: &str, count: usize) {
    counter!("peer_replication_tasks_discarded_total", "peer_id" => peer_id.to_string())
        .increment(count as u64);
}

/// Record a Register issued because the peer lost an instance.
pub fn record_self_heal(peer_id: &str) {
    counter!("peer_replication_self_heals_total", "peer_id" => peer_id.to_string()).increment(1);
}

/// Record a peer instance record adopted locally.
pub fn record_adoption(peer_id: &str) {
    counter!("peer_replication_adoptions_total", "peer_id" => peer_id.to_string()).increment(1);
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Gauge for client state.
pub fn set_node_state(peer_id: &str, state: &str) {
    // Numeric for alerting
    let value = match state {
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        _ => -1.0,
    };
    gauge!("peer_replication_node_state", "peer_id" => peer_id.to_string()).set(value);
}
