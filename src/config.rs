// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for peer replication.
//!
//! Configuration is passed to [`PeerNodeClient::new()`](crate::PeerNodeClient::new)
//! or [`PeerCluster::new()`](crate::PeerCluster::new) and can be constructed
//! programmatically or deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use peer_replication::config::{ReplicationConfig, PeerConfig};
//!
//! let config = ReplicationConfig {
//!     local_node_id: "registry-1".into(),
//!     peers: vec![
//!         PeerConfig::for_testing("registry-2", "http://registry-2:8080/v2"),
//!     ],
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── local_node_id: String          # This node's unique ID
//! ├── settings: ReplicationSettings  # Batching, retries, timeouts
//! └── peers: Vec<PeerConfig>         # Remote registry nodes
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "local_node_id": "registry-1",
//!   "settings": {
//!     "batch_size": 250,
//!     "max_batching_delay_ms": 500,
//!     "max_retries": 10,
//!     "error_sample_interval": "10s"
//!   },
//!   "peers": [
//!     { "node_id": "registry-2", "service_url": "http://registry-2:8080/v2" }
//!   ]
//! }
//! ```

use crate::batch::BatchConfig;
use crate::error::{ReplicationError, Result};
use crate::resilience::RetryDelays;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// The identity of the local node. Filtered out of the peer list.
    pub local_node_id: String,

    /// Tunables shared by every peer client.
    #[serde(default)]
    pub settings: ReplicationSettings,

    /// Peers to replicate to.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            local_node_id: "local.dev.node.default".to_string(),
            settings: ReplicationSettings::default(),
            peers: Vec::new(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(local_node_id: &str) -> Self {
        Self {
            local_node_id: local_node_id.to_string(),
            settings: ReplicationSettings::for_testing(),
            peers: Vec::new(),
        }
    }

    /// Load and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ReplicationError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Peers other than the local node.
    pub fn remote_peers(&self) -> impl Iterator<Item = &PeerConfig> {
        self.peers
            .iter()
            .filter(move |p| p.node_id != self.local_node_id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_node_id.trim().is_empty() {
            return Err(ReplicationError::Config("local_node_id is empty".to_string()));
        }
        self.settings.validate()?;

        let mut seen = HashSet::new();
        for peer in &self.peers {
            peer.validate()?;
            if !seen.insert(peer.node_id.as_str()) {
                return Err(ReplicationError::Config(format!(
                    "duplicate peer node_id: {}",
                    peer.node_id
                )));
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Batching, retry and timeout tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Maximum tasks per batch before a forced flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum time a task waits in the queue before a forced flush.
    #[serde(default = "default_max_batching_delay_ms")]
    pub max_batching_delay_ms: u64,

    /// Consecutive network failures before a failure is permanent.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Transport read timeout. Expiry is classified as congestion.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Transport connect timeout. Expiry is a network failure.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Back-off after a transient network failure.
    #[serde(default = "default_retry_sleep_ms")]
    pub retry_sleep_ms: u64,

    /// Back-off after the peer reported congestion.
    #[serde(default = "default_server_unavailable_sleep_ms")]
    pub server_unavailable_sleep_ms: u64,

    /// Expiry for tasks that are not lease-bound (everything except
    /// Register and Heartbeat).
    #[serde(default = "default_max_time_for_replication_ms")]
    pub max_time_for_replication_ms: u64,

    /// Adopt the peer's instance record when it replies with one.
    #[serde(default = "default_true")]
    pub sync_when_timestamp_differs: bool,

    /// Minimum gap between two network error log lines for one peer,
    /// as a duration string (e.g. "10s"). "0s" logs every error.
    #[serde(default = "default_error_sample_interval")]
    pub error_sample_interval: String,
}

fn default_batch_size() -> usize {
    250
}

fn default_max_batching_delay_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    10
}

fn default_read_timeout_ms() -> u64 {
    200
}

fn default_connect_timeout_ms() -> u64 {
    200
}

fn default_retry_sleep_ms() -> u64 {
    100
}

fn default_server_unavailable_sleep_ms() -> u64 {
    1000
}

fn default_max_time_for_replication_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

fn default_error_sample_interval() -> String {
    "10s".to_string()
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batching_delay_ms: default_max_batching_delay_ms(),
            max_retries: default_max_retries(),
            read_timeout_ms: default_read_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            retry_sleep_ms: default_retry_sleep_ms(),
            server_unavailable_sleep_ms: default_server_unavailable_sleep_ms(),
            max_time_for_replication_ms: default_max_time_for_replication_ms(),
            sync_when_timestamp_differs: true,
            error_sample_interval: default_error_sample_interval(),
        }
    }
}

impl ReplicationSettings {
    /// Small batches, short delays and unsampled logs for tests.
    pub fn for_testing() -> Self {
        Self {
            batch_size: 10,
            max_batching_delay_ms: 5,
            retry_sleep_ms: 5,
            server_unavailable_sleep_ms: 10,
            error_sample_interval: "0s".to_string(),
            ..Self::default()
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_batch_size: self.batch_size,
            max_batch_delay: Duration::from_millis(self.max_batching_delay_ms),
        }
    }

    pub fn retry_delays(&self) -> RetryDelays {
        RetryDelays {
            transient: Duration::from_millis(self.retry_sleep_ms),
            congestion: Duration::from_millis(self.server_unavailable_sleep_ms),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Expiry for tasks that are not lease-bound.
    pub fn max_time_for_replication(&self) -> Duration {
        Duration::from_millis(self.max_time_for_replication_ms)
    }

    /// Parse `error_sample_interval`. Falls back to 10s if unparseable;
    /// `validate()` rejects that case up front.
    pub fn error_sample_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.error_sample_interval).unwrap_or(Duration::from_secs(10))
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ReplicationError::Config("batch_size must be > 0".to_string()));
        }
        if self.max_retries == 0 {
            return Err(ReplicationError::Config("max_retries must be > 0".to_string()));
        }
        if self.max_time_for_replication_ms == 0 {
            return Err(ReplicationError::Config(
                "max_time_for_replication_ms must be > 0".to_string(),
            ));
        }
        // Queued tasks would expire before their first flush.
        if self.max_batching_delay_ms >= self.max_time_for_replication_ms {
            return Err(ReplicationError::Config(format!(
                "max_batching_delay_ms ({}) must be below max_time_for_replication_ms ({})",
                self.max_batching_delay_ms, self.max_time_for_replication_ms
            )));
        }
        humantime::parse_duration(&self.error_sample_interval).map_err(|e| {
            ReplicationError::Config(format!(
                "invalid error_sample_interval '{}': {}",
                self.error_sample_interval, e
            ))
        })?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PeerConfig: one entry per remote node
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for a single peer node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer's unique node ID (for logging and metrics labels).
    pub node_id: String,

    /// Base URL of the peer's registry API.
    /// Example: `"http://registry-2.example.com:8080/v2"`
    pub service_url: String,
}

impl PeerConfig {
    /// Name of this peer's batching worker: `target_<host>`, or
    /// `target_<service_url>` when the URL has no host.
    pub fn batcher_name(&self) -> String {
        let host = reqwest::Url::parse(&self.service_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| self.service_url.clone());
        format!("target_{}", host)
    }

    /// Create a peer config for testing.
    pub fn for_testing(node_id: &str, service_url: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            service_url: service_url.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(ReplicationError::Config("peer node_id is empty".to_string()));
        }
        if self.service_url.trim().is_empty() {
            return Err(ReplicationError::Config(format!(
                "peer {} has an empty service_url",
                self.node_id
            )));
        }
        Ok(())
    }
}
