//! Single-command routing by key slot or explicit node.

use crate::cluster::node::ClusterNode;
use crate::cluster::resolver::{ConnectionResolver, NodeConnection, NodeResolver};
use crate::cluster::slot::key_slot;
use crate::cluster::topology::TopologyCache;
use crate::command::CommandDescriptor;
use crate::error::Result;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Dispatches single commands to the node that should answer them.
///
/// Key-addressed commands go to the master owning the key's slot in the
/// current topology snapshot. Redirect replies (`MOVED`/`ASK`) are returned
/// as [`RouterError::Server`](crate::error::RouterError::Server); following
/// them is the transport's job.
pub struct CommandRouter<R> {
    resolver: NodeResolver<R>,
    topology: Arc<TopologyCache<R>>,
}

impl<R> Clone for CommandRouter<R> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            topology: Arc::clone(&self.topology),
        }
    }
}

impl<R: ConnectionResolver> CommandRouter<R> {
    pub fn new(resolver: NodeResolver<R>, topology: Arc<TopologyCache<R>>) -> Self {
        Self { resolver, topology }
    }

    pub fn resolver(&self) -> &NodeResolver<R> {
        &self.resolver
    }

    pub fn topology(&self) -> &Arc<TopologyCache<R>> {
        &self.topology
    }

    /// The master currently owning `key`'s slot.
    pub async fn node_for_key(&self, key: &[u8]) -> Result<ClusterNode> {
        let snapshot = self.topology.snapshot().await?;
        snapshot.node_for_key(key).cloned()
    }

    /// Issue one command on `node`.
    pub async fn execute_on<T>(
        &self,
        node: &ClusterNode,
        desc: CommandDescriptor<T>,
        args: Vec<Bytes>,
    ) -> Result<T> {
        self.execute_on_addr(&node.addr(), desc, args).await
    }

    /// Issue one command on the node tracked under `addr` (`host:port`).
    pub async fn execute_on_addr<T>(
        &self,
        addr: &str,
        desc: CommandDescriptor<T>,
        args: Vec<Bytes>,
    ) -> Result<T> {
        let frame = desc.frame(args)?;
        let conn = self.resolver.resolve_addr(addr)?;
        debug!("Routing {} to {}", desc.full_name(), addr);
        let reply = conn.request(frame).await?;
        desc.decode_reply(reply)
    }

    /// Issue one command on the master owning `key`'s slot.
    pub async fn execute_for_key<T>(
        &self,
        key: &[u8],
        desc: CommandDescriptor<T>,
        args: Vec<Bytes>,
    ) -> Result<T> {
        let snapshot = self.topology.snapshot().await?;
        let slot = key_slot(key);
        let node = snapshot.node_for_slot(slot)?;
        debug!("Key slot {} owned by {}", slot, node.id);
        self.execute_on(node, desc, args).await
    }

    /// Issue one command on whichever known node the resolver picks.
    pub async fn execute_any<T>(&self, desc: CommandDescriptor<T>, args: Vec<Bytes>) -> Result<T> {
        let frame = desc.frame(args)?;
        let (addr, conn) = self.resolver.any()?;
        debug!("Routing {} to {}", desc.full_name(), addr);
        let reply = conn.request(frame).await?;
        desc.decode_reply(reply)
    }
}
