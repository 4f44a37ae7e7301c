// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication client for one peer node.
//!
//! [`PeerNodeClient`] is the public surface: one method per registry
//! mutation. Each call builds a [`ReplicationTask`] and hands it to the
//! peer's background worker:
//!
//! - per-instance mutations go through the batching queue
//! - resource-group status updates are sent on their own and the caller
//!   gets the terminal [`ProcessingResult`]
//! - prime-connection heartbeats skip the worker entirely
//!
//! Calls never wait on the network. Outcomes show up as reconciliation
//! side effects (self-healing, adoption) and in [`PeerNodeClient::stats`].

mod types;
mod worker;

pub use types::{NodeState, StatsSnapshot};

use crate::batch::BatchingQueue;
use crate::config::{PeerConfig, ReplicationSettings};
use crate::error::{ReplicationError, Result};
use crate::instance::{InstanceInfo, InstanceStatus, ResourceGroupStatus};
use crate::metrics;
use crate::processor::{ProcessingResult, TaskProcessor};
use crate::reconciler::{LocalRegistry, NoOpRegistry, Reconciler};
use crate::task::ReplicationTask;
use crate::transport::{is_success, ReplicationTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::ReplicationStats;
use worker::{Command, PeerWorker};

/// How long `shutdown()` waits for the worker to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Replicates registry mutations to one peer.
pub struct PeerNodeClient<T: ReplicationTransport, R: LocalRegistry = NoOpRegistry> {
    peer_id: String,
    batcher_name: String,

    /// Used directly only for prime-connection heartbeats.
    transport: Arc<T>,

    registry: Arc<R>,

    /// Expiry for tasks that are not lease-bound.
    task_ttl: Duration,

    tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: watch::Sender<bool>,
    state_tx: watch::Sender<NodeState>,
    state_rx: watch::Receiver<NodeState>,
    stats: Arc<ReplicationStats>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: ReplicationTransport> PeerNodeClient<T, NoOpRegistry> {
    /// Create a client that does not reconcile into a local registry.
    ///
    /// Must be called inside a tokio runtime: the worker is spawned here.
    pub fn new(peer: &PeerConfig, settings: &ReplicationSettings, transport: Arc<T>) -> Result<Self> {
        Self::with_registry(peer, settings, transport, Arc::new(NoOpRegistry))
    }
}

impl<T: ReplicationTransport, R: LocalRegistry> PeerNodeClient<T, R> {
    /// Create a client that adopts peer records into `registry`.
    ///
    /// This is the primary constructor used by the registry.
    pub fn with_registry(
        peer: &PeerConfig,
        settings: &ReplicationSettings,
        transport: Arc<T>,
        registry: Arc<R>,
    ) -> Result<Self> {
        settings.validate()?;
        peer.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ReplicationError::Internal("PeerNodeClient must be created inside a tokio runtime".to_string())
        })?;

        let peer_id = peer.node_id.clone();
        let batcher_name = peer.batcher_name();
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(NodeState::Running);
        let stats = Arc::new(ReplicationStats::default());

        let worker = PeerWorker::new(
            TaskProcessor::new(
                peer_id.clone(),
                Arc::clone(&transport),
                settings.max_retries,
                settings.error_sample_interval_duration(),
            ),
            Reconciler::new(
                peer_id.clone(),
                Arc::clone(&registry),
                settings.sync_when_timestamp_differs,
            ),
            BatchingQueue::new(peer_id.clone(), settings.batch_config()),
            settings.retry_delays(),
            Arc::clone(&stats),
        );
        let handle = runtime.spawn(worker.run(rx, shutdown_rx, batcher_name.clone()));

        metrics::set_node_state(&peer_id, "Running");
        info!(peer_id = %peer_id, batcher = %batcher_name, "Spawned replication worker");

        Ok(Self {
            peer_id,
            batcher_name,
            transport,
            registry,
            task_ttl: settings.max_time_for_replication(),
            tx,
            shutdown_tx,
            state_tx,
            state_rx,
            stats,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Name of this peer's batching worker (`target_<host>`).
    pub fn batcher_name(&self) -> &str {
        &self.batcher_name
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Get current client state.
    pub fn state(&self) -> NodeState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<NodeState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == NodeState::Running
    }

    /// Snapshot of this client's counters. No I/O.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Replicate a registration.
    pub fn register(&self, info: InstanceInfo) -> Result<()> {
        self.submit(ReplicationTask::register(self.peer_id.as_str(), info))
    }

    /// Replicate a cancellation.
    pub fn cancel(&self, app_name: &str, instance_id: &str) -> Result<()> {
        self.submit(ReplicationTask::cancel(
            self.peer_id.as_str(),
            app_name,
            instance_id,
            self.task_ttl,
        ))
    }

    /// Replicate a lease renewal.
    ///
    /// With `prime_connection` set, the heartbeat is sent straight to the
    /// transport to warm up the connection. Its outcome is ignored and it
    /// does not affect the failure counter.
    pub fn heartbeat(
        &self,
        app_name: &str,
        instance_id: &str,
        info: Option<InstanceInfo>,
        overridden_status: Option<InstanceStatus>,
        prime_connection: bool,
    ) -> Result<()> {
        let task = ReplicationTask::heartbeat(
            self.peer_id.as_str(),
            app_name,
            instance_id,
            info,
            overridden_status,
        );
        if prime_connection {
            self.ensure_running()?;
            self.prime_connection(task);
            return Ok(());
        }
        self.submit(task)
    }

    /// Replicate an overridden status change.
    pub fn status_update(
        &self,
        app_name: &str,
        instance_id: &str,
        new_status: InstanceStatus,
        info: Option<InstanceInfo>,
    ) -> Result<()> {
        self.submit(ReplicationTask::status_update(
            self.peer_id.as_str(),
            app_name,
            instance_id,
            new_status,
            info,
            self.task_ttl,
        ))
    }

    /// Replicate removal of an overridden status.
    pub fn delete_status_override(
        &self,
        app_name: &str,
        instance_id: &str,
        info: Option<InstanceInfo>,
    ) -> Result<()> {
        self.submit(ReplicationTask::delete_status_override(
            self.peer_id.as_str(),
            app_name,
            instance_id,
            info,
            self.task_ttl,
        ))
    }

    /// Replicate a resource-group status change.
    ///
    /// Not batched. Resolves to the terminal result of the exchange once
    /// the worker has sent it (retrying congestion and transient failures
    /// until the task expires).
    pub async fn resource_group_status_update(
        &self,
        group_name: &str,
        status: ResourceGroupStatus,
    ) -> Result<ProcessingResult> {
        self.ensure_running()?;
        let task = ReplicationTask::resource_group_status(
            self.peer_id.as_str(),
            group_name,
            status,
            self.task_ttl,
        );
        metrics::record_task_submitted(&self.peer_id, task.action());
        ReplicationStats::incr(&self.stats.tasks_submitted);

        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(Command::Single { task, reply })
            .map_err(|_| ReplicationError::Shutdown)?;
        outcome.await.map_err(|_| ReplicationError::Shutdown)
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            NodeState::Running => Ok(()),
            NodeState::ShuttingDown => Err(ReplicationError::Shutdown),
            state @ NodeState::Stopped => Err(ReplicationError::InvalidState {
                expected: NodeState::Running.to_string(),
                actual: state.to_string(),
            }),
        }
    }

    fn submit(&self, task: ReplicationTask) -> Result<()> {
        debug_assert!(task.is_batchable(), "standalone tasks go through Command::Single");
        self.ensure_running()?;
        let action = task.action();
        self.tx
            .send(Command::Submit(task))
            .map_err(|_| ReplicationError::Shutdown)?;
        metrics::record_task_submitted(&self.peer_id, action);
        ReplicationStats::incr(&self.stats.tasks_submitted);
        Ok(())
    }

    fn prime_connection(&self, task: ReplicationTask) {
        let transport = Arc::clone(&self.transport);
        let peer_id = self.peer_id.clone();

        tokio::spawn(async move {
            let request = task.to_single_request();
            match transport.send_single(&peer_id, request).await {
                Ok(reply) => {
                    debug!(peer_id = %peer_id, status = reply.status, "Prime connection heartbeat sent");
                    metrics::record_prime_heartbeat(&peer_id, is_success(reply.status));
                }
                Err(e) => {
                    let err = ReplicationError::transport(peer_id.as_str(), e);
                    debug!(
                        error = %err,
                        retryable = err.is_retryable(),
                        "Prime connection heartbeat failed"
                    );
                    metrics::record_prime_heartbeat(&peer_id, false);
                }
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Stop accepting tasks and drain the worker.
    ///
    /// Shutdown sequence:
    /// 1. New calls fail with [`ReplicationError::Shutdown`] (and with
    ///    [`ReplicationError::InvalidState`] once stopped)
    /// 2. The worker finishes any in-flight exchange
    /// 3. Everything already accepted is sent once, without retry
    /// 4. State becomes `Stopped`
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let Some(handle) = self.worker.lock().await.take() else {
            return;
        };

        info!(peer_id = %self.peer_id, "Shutting down replication client");
        let _ = self.state_tx.send(NodeState::ShuttingDown);
        metrics::set_node_state(&self.peer_id, "ShuttingDown");
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
            Ok(Ok(())) => debug!(peer_id = %self.peer_id, "Worker completed gracefully"),
            Ok(Err(e)) => warn!(peer_id = %self.peer_id, error = %e, "Worker panicked during shutdown"),
            Err(_) => warn!(
                peer_id = %self.peer_id,
                "Worker did not drain in time; it keeps running detached"
            ),
        }

        let _ = self.state_tx.send(NodeState::Stopped);
        metrics::set_node_state(&self.peer_id, "Stopped");
        info!(peer_id = %self.peer_id, "Replication client stopped");
    }
}
