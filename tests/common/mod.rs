//! Shared test utilities for integration and property tests.
//!
//! This module provides:
//! - A scripted, recording [`ReplicationTransport`] mock
//! - A recording [`LocalRegistry`]
//! - Instance record helpers

#![allow(dead_code)]

pub mod mock_registry;
pub mod mock_transport;

pub use mock_registry::*;
pub use mock_transport::*;

use peer_replication::{InstanceInfo, InstanceStatus};

/// An `UP` instance record with a fixed dirty timestamp.
pub fn instance(app: &str, id: &str) -> InstanceInfo {
    let mut info = InstanceInfo::new(app, id);
    info.host_name = format!("{}.local", id);
    info.status = InstanceStatus::Up;
    info.last_dirty_timestamp = 1_700_000_000_000;
    info
}
