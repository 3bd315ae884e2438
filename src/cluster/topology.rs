//! Topology snapshots and the cache that swaps them.
//!
//! A snapshot is immutable once built. A refresh builds a new one from a
//! fresh `CLUSTER NODES` query and swaps the shared pointer, so a reader
//! holding an `Arc<TopologySnapshot>` never sees a half-updated topology.
//! Concurrent refreshes are not coordinated; the last one to finish wins.

use crate::cluster::node::ClusterNode;
use crate::cluster::resolver::{ConnectionResolver, NodeConnection, NodeResolver};
use crate::cluster::slot::key_slot;
use crate::command;
use crate::error::{Result, RouterError};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info};

/// The cluster as seen by one node at one instant.
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    nodes: Vec<ClusterNode>,
    source: Option<String>,
    captured_at: Instant,
}

impl TopologySnapshot {
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        Self {
            nodes,
            source: None,
            captured_at: Instant::now(),
        }
    }

    fn from_source(nodes: Vec<ClusterNode>, source: String) -> Self {
        Self {
            source: Some(source),
            ..Self::new(nodes)
        }
    }

    /// Every node of the snapshot, masters and replicas.
    pub fn nodes(&self) -> &[ClusterNode] {
        &self.nodes
    }

    /// Address of the node that answered the topology query.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Nodes currently acting as master.
    pub fn masters(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.is_master())
    }

    /// Nodes currently replicating a master.
    pub fn replicas(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter().filter(|n| n.is_replica())
    }

    /// Node with the 40-character ID `id`.
    pub fn find_by_id(&self, id: &str) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_by_address(&self, host: &str, port: u16) -> Option<&ClusterNode> {
        self.nodes.iter().find(|n| n.host == host && n.port == port)
    }

    /// The master serving `slot`.
    pub fn node_for_slot(&self, slot: u16) -> Result<&ClusterNode> {
        self.masters()
            .find(|n| n.serves_slot(slot))
            .ok_or(RouterError::SlotUnassigned(slot))
    }

    pub fn node_for_key(&self, key: &[u8]) -> Result<&ClusterNode> {
        self.node_for_slot(key_slot(key))
    }

    /// Replicas of the node at `master`'s host and port.
    pub fn slaves_of(&self, master: &ClusterNode) -> Result<Vec<ClusterNode>> {
        let found = self
            .find_by_address(&master.host, master.port)
            .ok_or_else(|| RouterError::MasterNotFound {
                host: master.host.clone(),
                port: master.port,
            })?;

        Ok(self
            .nodes
            .iter()
            .filter(|n| n.master_id.as_deref() == Some(found.id.as_str()))
            .cloned()
            .collect())
    }

    /// Every master, each with its (possibly empty) list of replicas.
    ///
    /// Replicas whose master is absent from the snapshot are not listed.
    pub fn master_slave_map(&self) -> HashMap<ClusterNode, Vec<ClusterNode>> {
        let (masters, others): (Vec<&ClusterNode>, Vec<&ClusterNode>) =
            self.nodes.iter().partition(|n| n.is_master());

        let mut by_master: HashMap<&str, Vec<ClusterNode>> = HashMap::new();
        for node in others {
            if let Some(master_id) = node.master_id.as_deref() {
                by_master.entry(master_id).or_default().push(node.clone());
            }
        }

        masters
            .into_iter()
            .map(|m| {
                let replicas = by_master.remove(m.id.as_str()).unwrap_or_default();
                (m.clone(), replicas)
            })
            .collect()
    }

    /// Number of slots served by some master.
    pub fn assigned_slots_count(&self) -> usize {
        self.masters()
            .flat_map(|m| m.slots.iter())
            .map(|r| r.slot_count())
            .sum()
    }
}

/// Shared holder of the current [`TopologySnapshot`].
pub struct TopologyCache<R> {
    resolver: NodeResolver<R>,
    current: RwLock<Option<Arc<TopologySnapshot>>>,
}

impl<R: ConnectionResolver> TopologyCache<R> {
    pub fn new(resolver: NodeResolver<R>) -> Self {
        Self {
            resolver,
            current: RwLock::new(None),
        }
    }

    /// Query one known node for `CLUSTER NODES` and install the result.
    pub async fn refresh(&self) -> Result<Arc<TopologySnapshot>> {
        let (addr, conn) = self.resolver.any()?;
        let frame = command::CLUSTER_NODES.frame(Vec::new())?;
        let reply = conn.request(frame).await?;
        let nodes = command::CLUSTER_NODES.decode_reply(reply)?;

        let snapshot = Arc::new(TopologySnapshot::from_source(nodes, addr));
        info!(
            "Topology refreshed from {}: {} nodes, {} masters, {} slots assigned",
            snapshot.source().unwrap_or("-"),
            snapshot.nodes().len(),
            snapshot.masters().count(),
            snapshot.assigned_slots_count()
        );
        self.install(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// The installed snapshot, if any refresh has completed.
    pub fn current(&self) -> Option<Arc<TopologySnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The installed snapshot, refreshing first when there is none yet.
    pub async fn snapshot(&self) -> Result<Arc<TopologySnapshot>> {
        match self.current() {
            Some(snapshot) => Ok(snapshot),
            None => {
                debug!("No topology snapshot yet, querying the cluster");
                self.refresh().await
            }
        }
    }

    /// Replace the current snapshot.
    pub fn install(&self, snapshot: Arc<TopologySnapshot>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}
