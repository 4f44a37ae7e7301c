//! Recording LocalRegistry for testing.
//!
//! Keeps every callback in one ordered log so tests can assert both what
//! was stored and in which order.

use peer_replication::{InstanceInfo, InstanceStatus, LocalRegistry};
use std::sync::Mutex;

/// A recorded registry callback.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCall {
    RegisterLocally {
        info: InstanceInfo,
        is_replication: bool,
    },
    StoreOverriddenStatus {
        app_name: String,
        instance_id: String,
        status: InstanceStatus,
    },
}

#[derive(Default)]
pub struct RecordingRegistry {
    calls: Mutex<Vec<RegistryCall>>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Records passed to `register_locally`, in order.
    pub fn registered(&self) -> Vec<InstanceInfo> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RegistryCall::RegisterLocally { info, .. } => Some(info),
                RegistryCall::StoreOverriddenStatus { .. } => None,
            })
            .collect()
    }
}

impl LocalRegistry for RecordingRegistry {
    fn register_locally(&self, info: InstanceInfo, is_replication: bool) {
        self.calls.lock().unwrap().push(RegistryCall::RegisterLocally {
            info,
            is_replication,
        });
    }

    fn store_overridden_status(&self, app_name: &str, instance_id: &str, status: InstanceStatus) {
        self.calls
            .lock()
            .unwrap()
            .push(RegistryCall::StoreOverriddenStatus {
                app_name: app_name.to_string(),
                instance_id: instance_id.to_string(),
                status,
            });
    }
}
