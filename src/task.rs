// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication tasks: one pending mutation directed at one peer.
//!
//! A task is a plain value. Its kind lives in [`TaskPayload`], the network
//! call is [`ReplicationTask::execute()`], and its outcome is recorded in
//! [`ProcessingState`] plus an optional [`ItemOutcome`] by the
//! [`TaskProcessor`](crate::processor::TaskProcessor).
//!
//! # State
//!
//! ```text
//! Pending ──┬──▶ Finished
//!           └──▶ Failed
//! ```
//!
//! Terminal states are sticky: once a task is `Finished` or `Failed`, later
//! transitions are ignored. Retries leave the task `Pending`.

use crate::instance::{InstanceInfo, InstanceStatus, ResourceGroupStatus};
use crate::protocol::{ReplicationInstance, SingleRequest};
use crate::transport::{ReplicationTransport, SingleReply, TransportFuture};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Kind of registry mutation being replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Register,
    Cancel,
    Heartbeat,
    StatusUpdate,
    DeleteStatusOverride,
}

impl Action {
    /// Prefix used in task ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Cancel => "cancel",
            Self::Heartbeat => "heartbeat",
            Self::StatusUpdate => "statusUpdate",
            Self::DeleteStatusOverride => "deleteStatusOverride",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action-specific data.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Register {
        info: InstanceInfo,
    },
    Cancel,
    Heartbeat {
        info: Option<InstanceInfo>,
        overridden_status: Option<InstanceStatus>,
    },
    StatusUpdate {
        new_status: InstanceStatus,
        info: Option<InstanceInfo>,
    },
    DeleteStatusOverride {
        info: Option<InstanceInfo>,
    },
    /// Group-wide status change. Never batched.
    ResourceGroupStatus {
        group_name: String,
        status: ResourceGroupStatus,
    },
}

impl TaskPayload {
    pub fn action(&self) -> Action {
        match self {
            Self::Register { .. } => Action::Register,
            Self::Cancel => Action::Cancel,
            Self::Heartbeat { .. } => Action::Heartbeat,
            Self::StatusUpdate { .. } | Self::ResourceGroupStatus { .. } => Action::StatusUpdate,
            Self::DeleteStatusOverride { .. } => Action::DeleteStatusOverride,
        }
    }
}

/// Processing state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    /// Not yet classified, or classified as retryable.
    Pending,
    /// Peer accepted the mutation.
    Finished,
    /// Peer rejected the mutation, or it could not be delivered.
    Failed,
}

impl ProcessingState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level reply the peer gave for this task.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemOutcome {
    pub status: u16,
    /// Peer's own view of the instance, sent back on conflicts.
    pub peer_instance: Option<InstanceInfo>,
}

/// One pending mutation for one peer.
#[derive(Debug, Clone)]
pub struct ReplicationTask {
    peer_id: String,
    app_name: String,
    instance_id: String,
    payload: TaskPayload,
    state: ProcessingState,
    outcome: Option<ItemOutcome>,
    expires_at: Instant,
}

impl ReplicationTask {
    fn new(
        peer_id: impl Into<String>,
        app_name: impl Into<String>,
        instance_id: impl Into<String>,
        payload: TaskPayload,
        ttl: Duration,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            app_name: app_name.into(),
            instance_id: instance_id.into(),
            payload,
            state: ProcessingState::Pending,
            outcome: None,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Register task; expires after the instance's lease renewal interval.
    pub fn register(peer_id: impl Into<String>, info: InstanceInfo) -> Self {
        let ttl = Duration::from_secs(info.lease_renewal_secs() as u64);
        let (app, id) = (info.app_name.clone(), info.instance_id.clone());
        Self::new(peer_id, app, id, TaskPayload::Register { info }, ttl)
    }

    pub fn cancel(
        peer_id: impl Into<String>,
        app_name: impl Into<String>,
        instance_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self::new(peer_id, app_name, instance_id, TaskPayload::Cancel, ttl)
    }

    /// Heartbeat task; expires after the lease renewal interval.
    pub fn heartbeat(
        peer_id: impl Into<String>,
        app_name: impl Into<String>,
        instance_id: impl Into<String>,
        info: Option<InstanceInfo>,
        overridden_status: Option<InstanceStatus>,
    ) -> Self {
        let secs = info
            .as_ref()
            .map(InstanceInfo::lease_renewal_secs)
            .unwrap_or(crate::instance::DEFAULT_LEASE_RENEWAL_SECS);
        Self::new(
            peer_id,
            app_name,
            instance_id,
            TaskPayload::Heartbeat {
                info,
                overridden_status,
            },
            Duration::from_secs(secs as u64),
        )
    }

    pub fn status_update(
        peer_id: impl Into<String>,
        app_name: impl Into<String>,
        instance_id: impl Into<String>,
        new_status: InstanceStatus,
        info: Option<InstanceInfo>,
        ttl: Duration,
    ) -> Self {
        Self::new(
            peer_id,
            app_name,
            instance_id,
            TaskPayload::StatusUpdate { new_status, info },
            ttl,
        )
    }

    pub fn delete_status_override(
        peer_id: impl Into<String>,
        app_name: impl Into<String>,
        instance_id: impl Into<String>,
        info: Option<InstanceInfo>,
        ttl: Duration,
    ) -> Self {
        Self::new(
            peer_id,
            app_name,
            instance_id,
            TaskPayload::DeleteStatusOverride { info },
            ttl,
        )
    }

    pub fn resource_group_status(
        peer_id: impl Into<String>,
        group_name: impl Into<String>,
        status: ResourceGroupStatus,
        ttl: Duration,
    ) -> Self {
        let group_name = group_name.into();
        Self::new(
            peer_id,
            String::new(),
            String::new(),
            TaskPayload::ResourceGroupStatus { group_name, status },
            ttl,
        )
    }

    /// Identity used to coalesce waiting tasks: `action#app/id`, or the
    /// group name for resource-group updates.
    pub fn id(&self) -> String {
        match &self.payload {
            TaskPayload::ResourceGroupStatus { group_name, .. } => group_name.clone(),
            payload => format!(
                "{}#{}/{}",
                payload.action(),
                self.app_name,
                self.instance_id
            ),
        }
    }

    /// Name used in log lines.
    pub fn name(&self) -> String {
        format!("{}/{}", self.peer_id, self.id())
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn action(&self) -> Action {
        self.payload.action()
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    /// The locally known instance record, if the task carries one.
    pub fn instance_info(&self) -> Option<&InstanceInfo> {
        match &self.payload {
            TaskPayload::Register { info } => Some(info),
            TaskPayload::Heartbeat { info, .. }
            | TaskPayload::StatusUpdate { info, .. }
            | TaskPayload::DeleteStatusOverride { info } => info.as_ref(),
            TaskPayload::Cancel | TaskPayload::ResourceGroupStatus { .. } => None,
        }
    }

    /// Resource-group updates bypass the batching queue.
    pub fn is_batchable(&self) -> bool {
        !matches!(self.payload, TaskPayload::ResourceGroupStatus { .. })
    }

    pub fn state(&self) -> ProcessingState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `Finished`. Returns `false` if already terminal.
    pub fn finish(&mut self) -> bool {
        self.transition(ProcessingState::Finished)
    }

    /// Move to `Failed`. Returns `false` if already terminal.
    pub fn fail(&mut self) -> bool {
        self.transition(ProcessingState::Failed)
    }

    fn transition(&mut self, to: ProcessingState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = to;
        true
    }

    pub fn outcome(&self) -> Option<&ItemOutcome> {
        self.outcome.as_ref()
    }

    pub(crate) fn set_outcome(&mut self, outcome: ItemOutcome) {
        self.outcome = Some(outcome);
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Wire form of this task as a single request.
    pub fn to_single_request(&self) -> SingleRequest {
        match &self.payload {
            TaskPayload::ResourceGroupStatus { group_name, status } => {
                SingleRequest::ResourceGroupStatus {
                    group_name: group_name.clone(),
                    status: *status,
                }
            }
            _ => SingleRequest::Instance(ReplicationInstance::from(self)),
        }
    }

    /// Perform the network call for this task on its own.
    pub fn execute<'a, T>(&'a self, transport: &'a T) -> TransportFuture<'a, SingleReply>
    where
        T: ReplicationTransport + ?Sized,
    {
        transport.send_single(&self.peer_id, self.to_single_request())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids() {
        let info = InstanceInfo::new("billing", "billing-1");
        let register = ReplicationTask::register("peer-1", info);
        assert_eq!(register.id(), "register#billing/billing-1");
        assert_eq!(register.name(), "peer-1/register#billing/billing-1");

        let cancel =
            ReplicationTask::cancel("peer-1", "billing", "billing-1", Duration::from_secs(30));
        assert_eq!(cancel.id(), "cancel#billing/billing-1");

        let group = ReplicationTask::resource_group_status(
            "peer-1",
            "group-a",
            ResourceGroupStatus::Disabled,
            Duration::from_secs(30),
        );
        assert_eq!(group.id(), "group-a");
        assert_eq!(group.action(), Action::StatusUpdate);
        assert!(!group.is_batchable());
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut task = ReplicationTask::heartbeat("peer-1", "a", "a-1", None, None);
        assert_eq!(task.state(), ProcessingState::Pending);

        assert!(task.fail());
        assert_eq!(task.state(), ProcessingState::Failed);

        assert!(!task.finish());
        assert_eq!(task.state(), ProcessingState::Failed);
        assert!(task.is_terminal());
    }

    #[test]
    fn test_register_expiry_follows_lease() {
        let mut info = InstanceInfo::new("a", "a-1");
        info.lease_renewal_interval_secs = Some(1);
        let task = ReplicationTask::register("peer-1", info);

        assert!(!task.is_expired(Instant::now()));
        assert!(task.is_expired(Instant::now() + Duration::from_secs(2)));
    }

    #[test]
    fn test_instance_info_by_payload() {
        let info = InstanceInfo::new("a", "a-1");
        let hb = ReplicationTask::heartbeat("p", "a", "a-1", Some(info.clone()), None);
        assert_eq!(hb.instance_info(), Some(&info));

        let cancel = ReplicationTask::cancel("p", "a", "a-1", Duration::from_secs(1));
        assert!(cancel.instance_info().is_none());
        assert!(cancel.is_batchable());
    }

    #[test]
    fn test_single_request_for_group() {
        let task = ReplicationTask::resource_group_status(
            "p",
            "group-a",
            ResourceGroupStatus::Enabled,
            Duration::from_secs(1),
        );
        match task.to_single_request() {
            SingleRequest::ResourceGroupStatus { group_name, status } => {
                assert_eq!(group_name, "group-a");
                assert_eq!(status, ResourceGroupStatus::Enabled);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }
}
