// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Outcome classification for replication exchanges.
//!
//! The [`TaskProcessor`] performs one exchange with a peer (a single task or
//! a whole batch), turns the outcome into a [`ProcessingResult`], and sets
//! each task's terminal state. It never returns an error to its caller.
//!
//! # Classification
//!
//! ```text
//!                  ┌─ 2xx ─────────────────────▶ Success          (reset)
//!  reply ──────────┼─ 503 ─────────────────────▶ Congestion       (reset)
//!                  └─ other ───────────────────▶ PermanentError   (reset)
//!
//!                  ┌─ read timeout ────────────▶ Congestion       (not counted)
//!  transport error ┼─ TLS ─────────────────────▶ PermanentError   (+1)
//!                  ├─ network, count < max ────▶ TransientError   (+1)
//!                  ├─ network, count >= max ───▶ PermanentError   (+1)
//!                  └─ protocol ────────────────▶ PermanentError   (not counted)
//! ```
//!
//! The counter is evaluated fresh on every exchange: a `PermanentError`
//! caused by the threshold is not latched, and the next success resets it.
//!
//! For batches, `Success` describes the exchange only. Each item carries
//! its own status and its task is `Finished` or `Failed` individually.

use crate::metrics;
use crate::protocol::{ReplicationList, ReplicationListResponse};
use crate::resilience::ErrorLogSampler;
use crate::task::{ItemOutcome, ReplicationTask};
use crate::transport::{is_success, ReplicationTransport, TransportError, STATUS_SERVICE_UNAVAILABLE};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, trace, warn};

/// Result of one classification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingResult {
    Success,
    /// Peer or path overloaded; retry later, no penalty.
    Congestion,
    /// Network failure below the retry threshold; retry.
    TransientError,
    /// Give up on the task(s).
    PermanentError,
}

impl ProcessingResult {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Congestion | Self::TransientError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Congestion => "congestion",
            Self::TransientError => "transient_error",
            Self::PermanentError => "permanent_error",
        }
    }
}

impl fmt::Display for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consecutive network failures seen for one peer.
///
/// Incremented by every network-layer failure, reset to zero by every
/// completed exchange regardless of the status it carried.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerFailureCounter {
    consecutive_network_failures: u32,
}

impl PeerFailureCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.consecutive_network_failures
    }

    /// Record a network failure; returns the new count.
    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_network_failures = self.consecutive_network_failures.saturating_add(1);
        self.consecutive_network_failures
    }

    /// Record a completed exchange; returns the count before the reset.
    pub fn record_success(&mut self) -> u32 {
        std::mem::take(&mut self.consecutive_network_failures)
    }
}

/// Classifies exchanges with one peer.
///
/// Owned by that peer's worker, so counter updates never race.
pub struct TaskProcessor<T: ReplicationTransport + ?Sized> {
    peer_id: String,
    transport: Arc<T>,
    max_retries: u32,
    counter: PeerFailureCounter,
    error_sampler: ErrorLogSampler,
}

impl<T: ReplicationTransport + ?Sized> TaskProcessor<T> {
    pub fn new(
        peer_id: impl Into<String>,
        transport: Arc<T>,
        max_retries: u32,
        error_sample_interval: Duration,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            transport,
            max_retries,
            counter: PeerFailureCounter::new(),
            error_sampler: ErrorLogSampler::new(error_sample_interval),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Current consecutive network failures for this peer.
    pub fn failure_count(&self) -> u32 {
        self.counter.count()
    }

    /// Execute one task on its own and classify the outcome.
    pub async fn process_single(&mut self, task: &mut ReplicationTask) -> ProcessingResult {
        let start = Instant::now();
        let outcome = task.execute(self.transport.as_ref()).await;
        metrics::record_exchange_latency(&self.peer_id, "single", start.elapsed());

        let result = match outcome {
            Ok(reply) => {
                debug!(
                    peer_id = %self.peer_id,
                    task = %task.name(),
                    status = reply.status,
                    has_body = reply.body.is_some(),
                    "Replication task completed"
                );
                let result = self.classify_status(reply.status);
                task.set_outcome(ItemOutcome {
                    status: reply.status,
                    peer_instance: reply.body,
                });
                match result {
                    ProcessingResult::Success => {
                        task.finish();
                    }
                    ProcessingResult::PermanentError => {
                        task.fail();
                    }
                    ProcessingResult::Congestion | ProcessingResult::TransientError => {
                        debug!(peer_id = %self.peer_id, task = %task.name(), "Server busy (503) reply");
                    }
                }
                result
            }
            Err(e) => {
                let result = self.classify_error(&e, Some(&task.name()));
                if result == ProcessingResult::PermanentError {
                    task.fail();
                }
                result
            }
        };

        metrics::record_processing_result(&self.peer_id, "single", result);
        if task.is_terminal() {
            metrics::record_task_terminal(&self.peer_id, task.action(), task.state());
        }
        result
    }

    /// Send `tasks` as one batch and classify the exchange.
    ///
    /// On a retryable result every task stays `Pending`. On a permanent
    /// transport-level result every task is `Failed`. Otherwise the result
    /// is `Success` and each task gets the terminal state of its own reply.
    #[instrument(skip(self, tasks), fields(peer_id = %self.peer_id, batch_size = tasks.len()))]
    pub async fn process_batch(&mut self, tasks: &mut [ReplicationTask]) -> ProcessingResult {
        if tasks.is_empty() {
            return ProcessingResult::Success;
        }

        let list = ReplicationList::of(tasks);
        let start = Instant::now();
        let outcome = self.transport.send_batch(&self.peer_id, list).await;
        metrics::record_exchange_latency(&self.peer_id, "batch", start.elapsed());

        let result = match outcome {
            Ok(reply) => {
                let result = self.classify_status(reply.status);
                match result {
                    ProcessingResult::Success => match reply.body {
                        Some(body) => self.apply_batch_reply(tasks, body),
                        None => {
                            error!(
                                peer_id = %self.peer_id,
                                batch_size = tasks.len(),
                                "Batch reply without body; failing replication tasks"
                            );
                            fail_all(tasks);
                        }
                    },
                    ProcessingResult::Congestion => {
                        warn!(
                            peer_id = %self.peer_id,
                            "Server busy (503) HTTP status code received from the peer; rescheduling tasks after delay"
                        );
                    }
                    ProcessingResult::PermanentError | ProcessingResult::TransientError => {
                        error!(
                            peer_id = %self.peer_id,
                            status = reply.status,
                            batch_size = tasks.len(),
                            "Batch update failure; discarding replication tasks"
                        );
                        fail_all(tasks);
                    }
                }
                result
            }
            Err(e) => {
                let result = self.classify_error(&e, None);
                if result == ProcessingResult::PermanentError {
                    fail_all(tasks);
                }
                result
            }
        };

        metrics::record_processing_result(&self.peer_id, "batch", result);
        for task in tasks.iter().filter(|t| t.is_terminal()) {
            metrics::record_task_terminal(&self.peer_id, task.action(), task.state());
        }
        result
    }

    /// Classify a completed exchange by its status code.
    fn classify_status(&mut self, status: u16) -> ProcessingResult {
        let previous = self.counter.record_success();
        if previous > 0 {
            trace!(
                peer_id = %self.peer_id,
                previous,
                max_retries = self.max_retries,
                "Network error indicator was reset"
            );
        }
        metrics::set_consecutive_failures(&self.peer_id, 0);

        if is_success(status) {
            ProcessingResult::Success
        } else if status == STATUS_SERVICE_UNAVAILABLE {
            ProcessingResult::Congestion
        } else {
            ProcessingResult::PermanentError
        }
    }

    /// Classify a transport failure.
    fn classify_error(&mut self, err: &TransportError, task_name: Option<&str>) -> ProcessingResult {
        if err.is_read_timeout() {
            if self.error_sampler.should_log() {
                error!(
                    peer_id = %self.peer_id,
                    task = task_name.unwrap_or("batch"),
                    error = %err,
                    "Read timeout talking to peer; will retry later. If this persists, raise read_timeout_ms"
                );
            }
            return ProcessingResult::Congestion;
        }

        if !err.is_network() {
            if self.error_sampler.should_log() {
                error!(
                    peer_id = %self.peer_id,
                    task = task_name.unwrap_or("batch"),
                    error = %err,
                    "Not retrying; failure does not look like a network error"
                );
            }
            return ProcessingResult::PermanentError;
        }

        let count = self.counter.record_failure();
        metrics::record_network_failure(&self.peer_id);
        metrics::set_consecutive_failures(&self.peer_id, count);

        let result = if err.is_tls() || count >= self.max_retries {
            ProcessingResult::PermanentError
        } else {
            ProcessingResult::TransientError
        };

        trace!(
            peer_id = %self.peer_id,
            count,
            max_retries = self.max_retries,
            permanent = result == ProcessingResult::PermanentError,
            "Network error occurred"
        );

        if self.error_sampler.should_log() {
            let retry = if result == ProcessingResult::TransientError {
                "retrying after delay"
            } else {
                "not retrying"
            };
            error!(
                peer_id = %self.peer_id,
                task = task_name.unwrap_or("batch"),
                count,
                max_retries = self.max_retries,
                error = %err,
                "Network level connection to peer failed; {}",
                retry
            );
        }

        result
    }

    fn apply_batch_reply(&self, tasks: &mut [ReplicationTask], body: ReplicationListResponse) {
        if body.response_list.len() != tasks.len() {
            error!(
                peer_id = %self.peer_id,
                replies = body.response_list.len(),
                submitted = tasks.len(),
                "Batch response size different from submitted task list; failing replication tasks"
            );
            fail_all(tasks);
            return;
        }

        for (task, reply) in tasks.iter_mut().zip(body.response_list) {
            if is_success(reply.status_code) {
                task.finish();
            } else {
                debug!(
                    peer_id = %self.peer_id,
                    task = %task.name(),
                    status = reply.status_code,
                    "Peer rejected batched item"
                );
                task.fail();
            }
            task.set_outcome(ItemOutcome {
                status: reply.status_code,
                peer_instance: reply.response_entity,
            });
        }
    }
}

fn fail_all(tasks: &mut [ReplicationTask]) {
    for task in tasks.iter_mut() {
        task.fail();
    }
}
