// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Peer Replication
//!
//! Propagates service-registry mutations from this node to its peers.
//!
//! ## Architecture
//!
//! Each peer gets a [`PeerNodeClient`] backed by one background worker:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                             peer-replication                              │
//! │                                                                           │
//! │  register / cancel / heartbeat / status ──┐                               │
//! │                                           ▼                               │
//! │  ┌────────────────┐   mpsc   ┌──────────────────┐   ┌──────────────────┐  │
//! │  │ PeerNodeClient │─────────►│  BatchingQueue   │──►│  TaskProcessor   │  │
//! │  │ (per peer)     │          │ (size or delay)  │   │ (classification, │  │
//! │  └────────────────┘          └──────────────────┘   │  failure counter)│  │
//! │          │ resource-group update (single)           └────────┬─────────┘  │
//! │          └───────────────────────────────────────────────────┤            │
//! │                                                              ▼            │
//! │                     ┌────────────────────────────────────────────────┐    │
//! │                     │ Reconciler: 404 heartbeat ─► Register task     │    │
//! │                     │             peer record  ─► LocalRegistry      │    │
//! │                     └────────────────────────────────────────────────┘    │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Classification
//!
//! Every exchange ends up as one [`ProcessingResult`]:
//!
//! 1. **Success**: 2xx. For batches, each item is settled by its own status.
//! 2. **Congestion**: 503 or read timeout. Retried later, not counted.
//! 3. **TransientError**: network failure below `max_retries`. Retried.
//! 4. **PermanentError**: anything else; the task(s) fail.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use peer_replication::{HttpReplicationTransport, InstanceInfo, PeerCluster, ReplicationConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ReplicationConfig::from_json_file("replication.json").expect("config");
//!     let transport = HttpReplicationTransport::new(&config.peers, &config.settings).expect("transport");
//!     let cluster = PeerCluster::new(&config, Arc::new(transport)).expect("cluster");
//!
//!     cluster.register(&InstanceInfo::new("BILLING", "billing-1")).expect("accepted");
//!
//!     cluster.shutdown().await;
//! }
//! ```

pub mod batch;
pub mod cluster;
pub mod config;
pub mod error;
pub mod http;
pub mod instance;
pub mod metrics;
pub mod node;
pub mod processor;
pub mod protocol;
pub mod reconciler;
pub mod resilience;
pub mod task;
pub mod transport;

// Re-exports for convenience
pub use batch::{BatchConfig, BatchingQueue};
pub use cluster::PeerCluster;
pub use config::{PeerConfig, ReplicationConfig, ReplicationSettings};
pub use error::{ReplicationError, Result};
pub use http::HttpReplicationTransport;
pub use instance::{InstanceInfo, InstanceStatus, ResourceGroupStatus};
pub use node::{NodeState, PeerNodeClient, StatsSnapshot};
pub use processor::{PeerFailureCounter, ProcessingResult, TaskProcessor};
pub use reconciler::{LocalRegistry, NoOpRegistry, Reconciler};
pub use task::{Action, ProcessingState, ReplicationTask};
pub use transport::{ReplicationTransport, TransportError};
