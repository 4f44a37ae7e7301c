// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Post-classification policy: self-healing and conflict adoption.
//!
//! Runs once per task after it has been classified:
//!
//! 1. A `Heartbeat` that failed with 404 means the peer lost the instance.
//!    The reconciler builds a `Register` task from the last locally known
//!    record so the worker can queue it before the next flush.
//! 2. A reply carrying the peer's own instance record means the peer
//!    disagrees. The peer wins: the record is handed to the local registry
//!    via [`LocalRegistry::register_locally`].
//!
//! # Example
//!
//! ```rust
//! use peer_replication::instance::{InstanceInfo, InstanceStatus};
//! use peer_replication::reconciler::LocalRegistry;
//!
//! struct Registry;
//!
//! impl LocalRegistry for Registry {
//!     fn register_locally(&self, info: InstanceInfo, is_replication: bool) {
//!         println!("adopting {} (replication={})", info.instance_id, is_replication);
//!     }
//! }
//! ```

use crate::instance::{InstanceInfo, InstanceStatus};
use crate::metrics;
use crate::task::{Action, ProcessingState, ReplicationTask};
use crate::transport::STATUS_NOT_FOUND;
use std::sync::Arc;
use tracing::{debug, warn};

/// The local registry store, as seen by replication.
///
/// Implemented by the registry that owns the instance records.
pub trait LocalRegistry: Send + Sync + 'static {
    /// Store `info` locally. `is_replication` is `true` when the record came
    /// from a peer, so the registry must not replicate it back out.
    fn register_locally(&self, info: InstanceInfo, is_replication: bool);

    /// Record an overridden status for an instance before adoption.
    ///
    /// Default implementation does nothing.
    fn store_overridden_status(&self, _app_name: &str, _instance_id: &str, _status: InstanceStatus) {}
}

/// Registry that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRegistry;

impl LocalRegistry for NoOpRegistry {
    fn register_locally(&self, _info: InstanceInfo, _is_replication: bool) {}
}

/// What reconciling one task produced.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Corrective task to queue before the next flush.
    pub self_heal: Option<ReplicationTask>,
    /// Whether the peer's record was adopted locally.
    pub adopted: bool,
}

/// Applies self-healing and conflict adoption for one peer.
pub struct Reconciler<R: LocalRegistry + ?Sized> {
    peer_id: String,
    registry: Arc<R>,
    sync_when_timestamp_differs: bool,
}

impl<R: LocalRegistry + ?Sized> Reconciler<R> {
    pub fn new(peer_id: impl Into<String>, registry: Arc<R>, sync_when_timestamp_differs: bool) -> Self {
        Self {
            peer_id: peer_id.into(),
            registry,
            sync_when_timestamp_differs,
        }
    }

    /// Reconcile a classified task.
    ///
    /// Tasks still `Pending` or without a peer reply are left alone.
    pub fn reconcile(&self, task: &ReplicationTask) -> Reconciliation {
        let mut result = Reconciliation::default();
        if !task.is_terminal() {
            return result;
        }
        let Some(outcome) = task.outcome() else {
            return result;
        };

        // A missing entry on the peer is answered by re-registering, never by
        // adopting whatever record came back with the 404.
        if task.state() == ProcessingState::Failed && outcome.status == STATUS_NOT_FOUND {
            match task.action() {
                Action::Heartbeat => result.self_heal = self.self_heal(task),
                Action::Cancel => {
                    warn!(
                        peer_id = %self.peer_id,
                        task = %task.name(),
                        "Cancel replication failed: missing entry on peer"
                    );
                }
                _ => {}
            }
        } else if let Some(peer_record) = &outcome.peer_instance {
            result.adopted = self.adopt(task, peer_record.clone());
        }

        result
    }

    fn self_heal(&self, task: &ReplicationTask) -> Option<ReplicationTask> {
        let Some(info) = task.instance_info() else {
            warn!(
                peer_id = %self.peer_id,
                task = %task.name(),
                "Peer does not know the instance and no local record is available; cannot re-register"
            );
            return None;
        };

        warn!(
            peer_id = %self.peer_id,
            task = %task.name(),
            "Instance not found on peer; re-registering"
        );
        metrics::record_self_heal(&self.peer_id);
        Some(ReplicationTask::register(self.peer_id.clone(), info.clone()))
    }

    fn adopt(&self, task: &ReplicationTask, peer_record: InstanceInfo) -> bool {
        if !self.sync_when_timestamp_differs {
            debug!(
                peer_id = %self.peer_id,
                task = %task.name(),
                "Peer sent a conflicting record; adoption disabled"
            );
            return false;
        }

        warn!(
            peer_id = %self.peer_id,
            task = %task.name(),
            peer_status = %peer_record.status,
            peer_dirty_timestamp = peer_record.last_dirty_timestamp,
            "Adopting peer's instance record"
        );

        if let Some(overridden) = peer_record.overridden_status {
            if overridden != InstanceStatus::Unknown {
                self.registry.store_overridden_status(
                    &peer_record.app_name,
                    &peer_record.instance_id,
                    overridden,
                );
            }
        }

        self.registry.register_locally(peer_record, true);
        metrics::record_adoption(&self.peer_id);
        true
    }
}
