//! Node resolution: from a cluster node to a live transport handle.
//!
//! Connection management itself lives outside this crate. The router only
//! needs two capabilities from it, expressed by [`ConnectionResolver`] and
//! [`NodeConnection`].

use crate::cluster::node::ClusterNode;
use crate::error::{Result, RouterError};
use crate::protocol::RespValue;
use bytes::Bytes;
use rand::seq::SliceRandom;
use std::future::Future;
use std::sync::Arc;

/// A live transport to one node.
pub trait NodeConnection: Send + Sync + 'static {
    /// Send one command frame and wait for its reply.
    fn request(&self, frame: Vec<Bytes>) -> impl Future<Output = Result<RespValue>> + Send;

    /// Send several frames in one round trip; replies come back in order.
    fn pipeline(
        &self,
        frames: Vec<Vec<Bytes>>,
    ) -> impl Future<Output = Result<Vec<RespValue>>> + Send;
}

/// Address-keyed lookup of live connections.
pub trait ConnectionResolver: Send + Sync + 'static {
    type Connection: NodeConnection;

    /// The connection currently tracked for `addr` (`host:port`), if any.
    fn connection(&self, addr: &str) -> Option<Arc<Self::Connection>>;

    /// Every address with a tracked connection.
    fn known_addresses(&self) -> Vec<String>;
}

/// Maps nodes to transport handles through a [`ConnectionResolver`].
pub struct NodeResolver<R> {
    resolver: Arc<R>,
}

impl<R> Clone for NodeResolver<R> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<R: ConnectionResolver> NodeResolver<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }

    /// The wrapped transport resolver.
    pub fn inner(&self) -> &Arc<R> {
        &self.resolver
    }

    /// Handle for `node`, or [`RouterError::NodeUnavailable`].
    pub fn resolve(&self, node: &ClusterNode) -> Result<Arc<R::Connection>> {
        self.resolve_addr(&node.addr())
    }

    /// Handle for the `host:port` address, or [`RouterError::NodeUnavailable`].
    pub fn resolve_addr(&self, addr: &str) -> Result<Arc<R::Connection>> {
        self.resolver
            .connection(addr)
            .ok_or_else(|| RouterError::NodeUnavailable(addr.to_string()))
    }

    /// A randomly chosen tracked connection, for commands any node can answer.
    pub fn any(&self) -> Result<(String, Arc<R::Connection>)> {
        let addresses = self.resolver.known_addresses();
        let addr = addresses
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| RouterError::NodeUnavailable("no known cluster node".to_string()))?;
        let conn = self.resolve_addr(addr)?;
        Ok((addr.clone(), conn))
    }
}
