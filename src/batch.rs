// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Batching queue for replication tasks.
//!
//! Collects tasks for one peer with id coalescing (latest wins) and hands
//! them out in size-bounded batches once the size or delay threshold is hit.
//!
//! # Design
//!
//! ```text
//! submit ──▶ BatchingQueue ──┬──▶ flush when len >= max_batch_size
//!            │               │      or oldest wait >= max_batch_delay
//!            │ IndexMap<id>  │      (and any retry back-off has passed)
//!            │ (latest wins, │
//!            │  keeps slot)  ▼
//!            │          take_batch() ──▶ expired tasks Failed, rest sent
//!            │
//!            └◀── requeue_front() after Congestion / TransientError
//! ```
//!
//! The queue is plain data: the peer worker owns it, so no locking.

use crate::metrics;
use crate::task::ReplicationTask;
use indexmap::IndexMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for batch accumulation.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum tasks per exchange.
    pub max_batch_size: usize,
    /// Maximum time the oldest task waits before a flush.
    pub max_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 250,
            max_batch_delay: Duration::from_millis(500),
        }
    }
}

impl BatchConfig {
    /// Fast flush for testing.
    pub fn testing() -> Self {
        Self {
            max_batch_size: 10,
            max_batch_delay: Duration::from_millis(5),
        }
    }
}

/// Tasks handed out by [`BatchingQueue::take_batch`].
#[derive(Debug, Default)]
pub struct TakenBatch {
    /// Still-live tasks to send, in arrival order.
    pub tasks: Vec<ReplicationTask>,
    /// Tasks whose deadline passed while waiting; already `Failed`.
    pub expired: Vec<ReplicationTask>,
}

/// Per-peer queue of tasks waiting to be sent.
#[derive(Debug)]
pub struct BatchingQueue {
    /// Waiting tasks keyed by task id (latest wins, first position kept).
    pending: IndexMap<String, ReplicationTask>,
    /// When the oldest waiting task arrived.
    batch_start: Option<Instant>,
    /// Retry back-off: no flush before this instant.
    not_before: Option<Instant>,
    config: BatchConfig,
    /// Peer ID (for logging).
    peer_id: String,
}

impl BatchingQueue {
    pub fn new(peer_id: impl Into<String>, config: BatchConfig) -> Self {
        Self {
            pending: IndexMap::new(),
            batch_start: None,
            not_before: None,
            config,
            peer_id: peer_id.into(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Add a task.
    ///
    /// A waiting task with the same id is replaced in place. Returns `true`
    /// when that happened.
    pub fn add(&mut self, task: ReplicationTask, now: Instant) -> bool {
        if self.batch_start.is_none() {
            self.batch_start = Some(now);
        }

        let id = task.id();
        let superseded = self.pending.insert(id, task).is_some();
        if superseded {
            metrics::record_task_superseded(&self.peer_id);
        }
        metrics::set_queue_depth(&self.peer_id, self.pending.len());
        superseded
    }

    /// Whether a batch should go out at `now`.
    pub fn should_flush(&self, now: Instant) -> bool {
        match self.flush_deadline() {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Earliest instant at which the queue wants to flush, if non-empty.
    pub fn flush_deadline(&self) -> Option<Instant> {
        let start = self.batch_start?;
        if self.pending.is_empty() {
            return None;
        }

        let due = if self.pending.len() >= self.config.max_batch_size {
            start
        } else {
            start + self.config.max_batch_delay
        };

        Some(match self.not_before {
            Some(not_before) if not_before > due => not_before,
            _ => due,
        })
    }

    /// Number of waiting tasks.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove up to `max_batch_size` tasks in arrival order.
    ///
    /// Tasks already past their deadline are set `Failed` and returned
    /// separately; they never reach the peer.
    pub fn take_batch(&mut self, now: Instant) -> TakenBatch {
        let take = self.pending.len().min(self.config.max_batch_size);
        let mut batch = TakenBatch::default();

        for (_, mut task) in self.pending.drain(..take) {
            if task.is_expired(now) {
                task.fail();
                batch.expired.push(task);
            } else {
                batch.tasks.push(task);
            }
        }

        if !batch.expired.is_empty() {
            warn!(
                peer_id = %self.peer_id,
                expired = batch.expired.len(),
                "Replication tasks expired before being sent; dropping them"
            );
            metrics::record_tasks_expired(&self.peer_id, batch.expired.len());
        }

        self.not_before = None;
        if self.pending.is_empty() {
            self.batch_start = None;
        }
        metrics::set_queue_depth(&self.peer_id, self.pending.len());

        batch
    }

    /// Put retryable tasks back at the front, to go out after `delay`.
    ///
    /// A task is dropped instead if a newer task with the same id arrived
    /// while it was in flight. Returns the number requeued.
    pub fn requeue_front(
        &mut self,
        tasks: Vec<ReplicationTask>,
        delay: Duration,
        now: Instant,
    ) -> usize {
        let mut requeued = IndexMap::with_capacity(tasks.len() + self.pending.len());

        for task in tasks.into_iter().filter(|t| !t.is_terminal()) {
            let id = task.id();
            if self.pending.contains_key(&id) {
                debug!(
                    peer_id = %self.peer_id,
                    task = %task.name(),
                    "Dropping retry; a newer task with the same id is waiting"
                );
                continue;
            }
            requeued.insert(id, task);
        }

        let count = requeued.len();
        if count == 0 {
            return 0;
        }

        requeued.extend(self.pending.drain(..));
        self.pending = requeued;
        self.batch_start = Some(match self.batch_start {
            Some(start) if start < now => start,
            _ => now,
        });
        self.not_before = Some(now + delay);
        metrics::set_queue_depth(&self.peer_id, self.pending.len());

        debug!(
            peer_id = %self.peer_id,
            requeued = count,
            delay_ms = delay.as_millis() as u64,
            "Rescheduled replication tasks"
        );
        count
    }
}
