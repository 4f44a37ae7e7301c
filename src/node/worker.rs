// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-peer background worker.
//!
//! One worker per peer owns the [`BatchingQueue`], the [`TaskProcessor`]
//! (and therefore the failure counter) and the [`Reconciler`]. Callers only
//! push [`Command`]s into an unbounded channel, so they never wait on the
//! network.
//!
//! # Loop
//!
//! ```text
//!          ┌──────────────── select! (biased) ────────────────┐
//!          │ 1. shutdown signal ──▶ leave loop, drain          │
//!          │ 2. deadline reached ─▶ due singles, then flush    │
//!          │ 3. command ──────────▶ queue / single backlog     │
//!          └───────────────────────────────────────────────────┘
//! ```
//!
//! Exchanges run inside the loop body, so only one is ever in flight per
//! peer and a task submitted meanwhile lands in the next batch.
//!
//! # Graceful Shutdown
//!
//! 1. The loop exits between exchanges; an in-flight exchange completes.
//! 2. The intake channel is closed and everything already accepted is
//!    queued.
//! 3. Waiting singles and batches are sent once, without retry.
//! 4. Tasks that come back retryable are discarded with a warning.

use super::types::ReplicationStats;
use crate::batch::{BatchingQueue, TakenBatch};
use crate::metrics;
use crate::processor::{ProcessingResult, TaskProcessor};
use crate::reconciler::{LocalRegistry, Reconciler};
use crate::resilience::RetryDelays;
use crate::task::{ProcessingState, ReplicationTask};
use crate::transport::ReplicationTransport;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

/// Message from a client to its worker.
pub(crate) enum Command {
    /// Queue for batching.
    Submit(ReplicationTask),
    /// Send on its own; the terminal result goes back over `reply`.
    Single {
        task: ReplicationTask,
        reply: oneshot::Sender<ProcessingResult>,
    },
}

#[derive(Debug, Clone, Copy)]
enum FlushReason {
    Size,
    Delay,
    Shutdown,
}

impl FlushReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Delay => "delay",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A standalone task waiting for its (next) attempt.
struct PendingSingle {
    task: ReplicationTask,
    reply: oneshot::Sender<ProcessingResult>,
    not_before: Instant,
}

pub(crate) struct PeerWorker<T: ReplicationTransport, R: LocalRegistry> {
    peer_id: String,
    processor: TaskProcessor<T>,
    reconciler: Reconciler<R>,
    queue: BatchingQueue,
    singles: VecDeque<PendingSingle>,
    delays: RetryDelays,
    stats: Arc<ReplicationStats>,
}

impl<T: ReplicationTransport, R: LocalRegistry> PeerWorker<T, R> {
    pub fn new(
        processor: TaskProcessor<T>,
        reconciler: Reconciler<R>,
        queue: BatchingQueue,
        delays: RetryDelays,
        stats: Arc<ReplicationStats>,
    ) -> Self {
        Self {
            peer_id: processor.peer_id().to_string(),
            processor,
            reconciler,
            queue,
            singles: VecDeque::new(),
            delays,
            stats,
        }
    }

    /// Run until shutdown is signalled or every client handle is gone.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: watch::Receiver<bool>,
        batcher_name: String,
    ) {
        let span = info_span!("peer_worker", peer_id = %self.peer_id, batcher = %batcher_name);

        async move {
            info!(
                max_batch_size = self.queue.config().max_batch_size,
                max_batch_delay_ms = self.queue.config().max_batch_delay.as_millis() as u64,
                max_retries = self.processor.max_retries(),
                "Starting replication worker"
            );

            loop {
                let deadline = self.next_deadline();

                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Shutdown signal received");
                            break;
                        }
                    }
                    () = wait_until(deadline) => {
                        self.on_deadline().await;
                    }
                    cmd = rx.recv() => {
                        match cmd {
                            Some(cmd) => self.accept(cmd),
                            None => {
                                debug!("All client handles dropped");
                                break;
                            }
                        }
                    }
                }
            }

            self.drain(rx).await;
            info!("Replication worker stopped");
        }
        .instrument(span)
        .await
    }

    fn next_deadline(&self) -> Option<Instant> {
        let single = self.singles.iter().map(|s| s.not_before).min();
        match (self.queue.flush_deadline(), single) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn accept(&mut self, cmd: Command) {
        match cmd {
            Command::Submit(task) => self.enqueue(task),
            Command::Single { task, reply } => self.singles.push_back(PendingSingle {
                task,
                reply,
                not_before: Instant::now(),
            }),
        }
    }

    fn enqueue(&mut self, task: ReplicationTask) {
        if self.queue.add(task, Instant::now()) {
            ReplicationStats::incr(&self.stats.tasks_superseded);
        }
    }

    async fn on_deadline(&mut self) {
        self.run_due_singles(Instant::now()).await;

        if self.queue.should_flush(Instant::now()) {
            let reason = if self.queue.len() >= self.queue.config().max_batch_size {
                FlushReason::Size
            } else {
                FlushReason::Delay
            };
            self.flush(reason, true).await;
        }
    }

    async fn run_due_singles(&mut self, now: Instant) {
        let mut waiting = VecDeque::with_capacity(self.singles.len());
        while let Some(pending) = self.singles.pop_front() {
            if pending.not_before > now {
                waiting.push_back(pending);
                continue;
            }
            if let Some(retry) = self.run_single(pending, true).await {
                waiting.push_back(retry);
            }
        }
        self.singles = waiting;
    }

    /// One attempt at a standalone task. Returns it back if it should be
    /// retried later.
    async fn run_single(&mut self, mut pending: PendingSingle, allow_retry: bool) -> Option<PendingSingle> {
        if pending.task.is_expired(Instant::now()) {
            pending.task.fail();
            warn!(task = %pending.task.name(), "Replication task expired before being sent");
            metrics::record_tasks_expired(&self.peer_id, 1);
            ReplicationStats::incr(&self.stats.tasks_expired);
            ReplicationStats::incr(&self.stats.tasks_failed);
            let _ = pending.reply.send(ProcessingResult::PermanentError);
            return None;
        }

        let result = self.processor.process_single(&mut pending.task).await;
        ReplicationStats::incr(&self.stats.singles_sent);
        self.sync_failure_count();

        if let Some(delay) = self.delays.delay_for(result) {
            if allow_retry {
                debug!(
                    task = %pending.task.name(),
                    result = %result,
                    delay_ms = delay.as_millis() as u64,
                    "Rescheduling standalone task"
                );
                pending.not_before = Instant::now() + delay;
                return Some(pending);
            }
            warn!(
                task = %pending.task.name(),
                result = %result,
                "Discarding retryable standalone task at shutdown"
            );
            metrics::record_tasks_discarded(&self.peer_id, 1);
            ReplicationStats::incr(&self.stats.tasks_discarded);
        }

        self.settle(&pending.task);
        let _ = pending.reply.send(result);
        None
    }

    #[instrument(skip(self, reason), fields(peer_id = %self.peer_id, reason = reason.as_str()))]
    async fn flush(&mut self, reason: FlushReason, allow_retry: bool) {
        let TakenBatch { mut tasks, expired } = self.queue.take_batch(Instant::now());

        if !expired.is_empty() {
            ReplicationStats::add(&self.stats.tasks_expired, expired.len());
            ReplicationStats::add(&self.stats.tasks_failed, expired.len());
            for task in &expired {
                metrics::record_task_terminal(&self.peer_id, task.action(), task.state());
            }
        }
        if tasks.is_empty() {
            return;
        }

        metrics::record_batch_flush(&self.peer_id, reason.as_str(), tasks.len());
        debug!(batch_size = tasks.len(), "Flushing replication batch");

        let result = self.processor.process_batch(&mut tasks).await;
        ReplicationStats::incr(&self.stats.batches_sent);
        self.sync_failure_count();

        if let Some(delay) = self.delays.delay_for(result) {
            if allow_retry {
                self.queue.requeue_front(tasks, delay, Instant::now());
            } else {
                warn!(
                    count = tasks.len(),
                    result = %result,
                    "Discarding retryable replication tasks at shutdown"
                );
                metrics::record_tasks_discarded(&self.peer_id, tasks.len());
                ReplicationStats::add(&self.stats.tasks_discarded, tasks.len());
            }
            return;
        }

        for task in &tasks {
            self.settle(task);
        }
    }

    /// Count a classified task and run reconciliation on it.
    fn settle(&mut self, task: &ReplicationTask) {
        match task.state() {
            ProcessingState::Finished => ReplicationStats::incr(&self.stats.tasks_finished),
            ProcessingState::Failed => ReplicationStats::incr(&self.stats.tasks_failed),
            ProcessingState::Pending => return,
        }

        let reconciliation = self.reconciler.reconcile(task);
        if let Some(register) = reconciliation.self_heal {
            ReplicationStats::incr(&self.stats.self_heals);
            self.enqueue(register);
        }
        if reconciliation.adopted {
            ReplicationStats::incr(&self.stats.adoptions);
        }
    }

    fn sync_failure_count(&self) {
        self.stats
            .consecutive_network_failures
            .store(self.processor.failure_count(), Ordering::Relaxed);
    }

    /// Send everything already accepted once, then stop.
    async fn drain(&mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        rx.close();
        while let Some(cmd) = rx.recv().await {
            self.accept(cmd);
        }

        let singles = std::mem::take(&mut self.singles);
        let batched = self.queue.len();
        if !singles.is_empty() || batched > 0 {
            info!(
                singles = singles.len(),
                batched,
                "Draining replication tasks"
            );
        }

        for pending in singles {
            let _ = self.run_single(pending, false).await;
        }

        // Self-heal Registers may be queued by the drain itself; a Register
        // never heals, so this terminates.
        while !self.queue.is_empty() {
            self.flush(FlushReason::Shutdown, false).await;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
