// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire format for peer replication.
//!
//! A batch is a [`ReplicationList`]; the peer answers with a
//! [`ReplicationListResponse`] whose entries line up with the request by
//! position.
//!
//! ```json
//! { "replicationList": [
//!     { "appName": "BILLING", "id": "billing-1", "action": "Heartbeat",
//!       "status": "UP", "lastDirtyTimestamp": 1700000000000 } ] }
//!
//! { "responseList": [ { "statusCode": 404 } ] }
//! ```

use crate::instance::{InstanceInfo, ResourceGroupStatus};
use crate::task::{Action, ReplicationTask, TaskPayload};
use serde::{Deserialize, Serialize};

/// One batched mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationInstance {
    pub app_name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_dirty_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overridden_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Full record; only sent for `Register`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_info: Option<InstanceInfo>,
    pub action: Action,
}

impl From<&ReplicationTask> for ReplicationInstance {
    fn from(task: &ReplicationTask) -> Self {
        let mut wire = ReplicationInstance {
            app_name: task.app_name().to_string(),
            id: task.instance_id().to_string(),
            last_dirty_timestamp: None,
            overridden_status: None,
            status: None,
            instance_info: None,
            action: task.action(),
        };

        if let Some(info) = task.instance_info() {
            wire.last_dirty_timestamp = Some(info.last_dirty_timestamp);
            wire.status = Some(info.status.as_str().to_string());
        }

        match task.payload() {
            TaskPayload::Register { info } => {
                wire.instance_info = Some(info.clone());
            }
            TaskPayload::Heartbeat {
                overridden_status, ..
            } => {
                wire.overridden_status = overridden_status.map(|s| s.as_str().to_string());
            }
            TaskPayload::StatusUpdate { new_status, .. } => {
                wire.status = Some(new_status.as_str().to_string());
            }
            TaskPayload::Cancel
            | TaskPayload::DeleteStatusOverride { .. }
            | TaskPayload::ResourceGroupStatus { .. } => {}
        }

        wire
    }
}

/// Batch request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationList {
    pub replication_list: Vec<ReplicationInstance>,
}

impl ReplicationList {
    /// Build the request for a batch, preserving order.
    pub fn of(tasks: &[ReplicationTask]) -> Self {
        Self {
            replication_list: tasks.iter().map(ReplicationInstance::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.replication_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replication_list.is_empty()
    }
}

/// Peer's answer for one batched item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationInstanceResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_entity: Option<InstanceInfo>,
}

impl ReplicationInstanceResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            response_entity: None,
        }
    }

    pub fn with_entity(status_code: u16, entity: InstanceInfo) -> Self {
        Self {
            status_code,
            response_entity: Some(entity),
        }
    }
}

/// Batch reply body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationListResponse {
    pub response_list: Vec<ReplicationInstanceResponse>,
}

/// A standalone (non-batched) request.
#[derive(Debug, Clone, PartialEq)]
pub enum SingleRequest {
    Instance(ReplicationInstance),
    ResourceGroupStatus {
        group_name: String,
        status: ResourceGroupStatus,
    },
}

impl SingleRequest {
    pub fn action(&self) -> Action {
        match self {
            Self::Instance(wire) => wire.action,
            Self::ResourceGroupStatus { .. } => Action::StatusUpdate,
        }
    }
}
