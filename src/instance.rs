// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Instance records as carried between registry peers.
//!
//! The registry store itself lives outside this crate; these types are the
//! subset of an instance record that replication needs to move around.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lease renewal interval assumed when a record carries none (seconds).
pub const DEFAULT_LEASE_RENEWAL_SECS: u32 = 30;

/// Lifecycle status of a registered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Up,
    Down,
    Starting,
    OutOfService,
    Unknown,
}

impl InstanceStatus {
    /// Wire name (`UP`, `OUT_OF_SERVICE`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Starting => "STARTING",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a whole resource group (deployment group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceGroupStatus {
    Enabled,
    Disabled,
}

impl ResourceGroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "ENABLED",
            Self::Disabled => "DISABLED",
        }
    }
}

impl fmt::Display for ResourceGroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One running service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub app_name: String,
    pub instance_id: String,
    #[serde(default)]
    pub host_name: String,
    #[serde(default)]
    pub ip_addr: String,
    #[serde(default)]
    pub port: u16,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overridden_status: Option<InstanceStatus>,
    /// Millis since epoch of the last local modification.
    #[serde(default)]
    pub last_dirty_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_renewal_interval_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl InstanceInfo {
    /// Minimal `UP` record, mostly useful in tests and examples.
    pub fn new(app_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            instance_id: instance_id.into(),
            host_name: String::new(),
            ip_addr: String::new(),
            port: 0,
            status: InstanceStatus::Up,
            overridden_status: None,
            last_dirty_timestamp: 0,
            lease_renewal_interval_secs: None,
            metadata: HashMap::new(),
        }
    }

    /// Lease renewal interval in seconds, falling back to the default.
    pub fn lease_renewal_secs(&self) -> u32 {
        self.lease_renewal_interval_secs
            .unwrap_or(DEFAULT_LEASE_RENEWAL_SECS)
    }
}
