// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fan-out to every configured peer.
//!
//! [`PeerCluster`] holds one [`PeerNodeClient`] per remote peer (the local
//! node is skipped) and broadcasts each mutation to all of them. Peers are
//! independent: a slow or dead peer only affects its own worker.

use crate::config::{PeerConfig, ReplicationConfig, ReplicationSettings};
use crate::error::{ReplicationError, Result};
use crate::instance::{InstanceInfo, InstanceStatus, ResourceGroupStatus};
use crate::node::{PeerNodeClient, StatsSnapshot};
use crate::processor::ProcessingResult;
use crate::reconciler::{LocalRegistry, NoOpRegistry};
use crate::transport::ReplicationTransport;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Replication clients for all peers of this node.
pub struct PeerCluster<T: ReplicationTransport, R: LocalRegistry = NoOpRegistry> {
    local_node_id: String,
    settings: ReplicationSettings,
    transport: Arc<T>,
    registry: Arc<R>,
    /// Clients keyed by peer node id.
    clients: DashMap<String, Arc<PeerNodeClient<T, R>>>,
}

impl<T: ReplicationTransport> PeerCluster<T, NoOpRegistry> {
    pub fn new(config: &ReplicationConfig, transport: Arc<T>) -> Result<Self> {
        Self::with_registry(config, transport, Arc::new(NoOpRegistry))
    }
}

impl<T: ReplicationTransport, R: LocalRegistry> PeerCluster<T, R> {
    /// Validate `config` and start one client per remote peer.
    pub fn with_registry(config: &ReplicationConfig, transport: Arc<T>, registry: Arc<R>) -> Result<Self> {
        config.validate()?;

        let cluster = Self {
            local_node_id: config.local_node_id.clone(),
            settings: config.settings.clone(),
            transport,
            registry,
            clients: DashMap::new(),
        };
        for peer in config.remote_peers() {
            cluster.add_peer(peer)?;
        }

        info!(
            node_id = %cluster.local_node_id,
            peer_count = cluster.len(),
            "Peer replication cluster started"
        );
        Ok(cluster)
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    /// Start a client for `peer`. The local node is ignored.
    pub fn add_peer(&self, peer: &PeerConfig) -> Result<()> {
        if peer.node_id == self.local_node_id {
            return Ok(());
        }
        if self.clients.contains_key(&peer.node_id) {
            return Err(ReplicationError::Config(format!(
                "peer {} already present",
                peer.node_id
            )));
        }
        let client = PeerNodeClient::with_registry(
            peer,
            &self.settings,
            Arc::clone(&self.transport),
            Arc::clone(&self.registry),
        )?;
        self.clients.insert(peer.node_id.clone(), Arc::new(client));
        Ok(())
    }

    /// Remove a peer's client and shut it down.
    pub async fn remove_peer(&self, node_id: &str) -> bool {
        match self.clients.remove(node_id) {
            Some((_, client)) => {
                client.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Get a client by peer node ID.
    pub fn get(&self, node_id: &str) -> Option<Arc<PeerNodeClient<T, R>>> {
        self.clients.get(node_id).map(|r| Arc::clone(r.value()))
    }

    /// All clients, ordered by peer node id.
    pub fn all(&self) -> Vec<Arc<PeerNodeClient<T, R>>> {
        let mut clients: Vec<_> = self.clients.iter().map(|r| Arc::clone(r.value())).collect();
        clients.sort_by(|a, b| a.peer_id().cmp(b.peer_id()));
        clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn register(&self, info: &InstanceInfo) -> Result<()> {
        self.broadcast(|c| c.register(info.clone()))
    }

    pub fn cancel(&self, app_name: &str, instance_id: &str) -> Result<()> {
        self.broadcast(|c| c.cancel(app_name, instance_id))
    }

    pub fn heartbeat(
        &self,
        app_name: &str,
        instance_id: &str,
        info: Option<&InstanceInfo>,
        overridden_status: Option<InstanceStatus>,
        prime_connection: bool,
    ) -> Result<()> {
        self.broadcast(|c| {
            c.heartbeat(
                app_name,
                instance_id,
                info.cloned(),
                overridden_status,
                prime_connection,
            )
        })
    }

    pub fn status_update(
        &self,
        app_name: &str,
        instance_id: &str,
        new_status: InstanceStatus,
        info: Option<&InstanceInfo>,
    ) -> Result<()> {
        self.broadcast(|c| c.status_update(app_name, instance_id, new_status, info.cloned()))
    }

    pub fn delete_status_override(
        &self,
        app_name: &str,
        instance_id: &str,
        info: Option<&InstanceInfo>,
    ) -> Result<()> {
        self.broadcast(|c| c.delete_status_override(app_name, instance_id, info.cloned()))
    }

    /// Send a resource-group update to every peer concurrently and collect
    /// each peer's terminal result.
    pub async fn resource_group_status_update(
        &self,
        group_name: &str,
        status: ResourceGroupStatus,
    ) -> Vec<(String, Result<ProcessingResult>)> {
        let clients = self.all();
        let results = join_all(
            clients
                .iter()
                .map(|c| c.resource_group_status_update(group_name, status)),
        )
        .await;

        clients
            .iter()
            .map(|c| c.peer_id().to_string())
            .zip(results)
            .collect()
    }

    /// Counters for every peer, ordered by peer node id.
    pub fn stats(&self) -> Vec<(String, StatsSnapshot)> {
        self.all()
            .iter()
            .map(|c| (c.peer_id().to_string(), c.stats()))
            .collect()
    }

    /// Shut every client down in parallel.
    pub async fn shutdown(&self) {
        let clients = self.all();
        info!(peer_count = clients.len(), "Shutting down peer replication cluster");
        join_all(clients.iter().map(|c| c.shutdown())).await;
    }

    /// Apply `op` to every client. Every peer is attempted; the first
    /// error is returned.
    fn broadcast<F>(&self, op: F) -> Result<()>
    where
        F: Fn(&PeerNodeClient<T, R>) -> Result<()>,
    {
        let mut first_error = None;
        for client in self.all() {
            if let Err(e) = op(&client) {
                warn!(peer_id = %client.peer_id(), error = %e, "Replication to peer not accepted");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
