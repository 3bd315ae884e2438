//! Multi-command batches.
//!
//! A batch is split by target node, each node's share is sent as one
//! pipelined round trip, and the replies are put back in submission order.
//! Nodes are contacted concurrently. There is no atomicity across nodes;
//! an atomic batch only wraps each node's share in `MULTI`/`EXEC`.

use crate::cluster::node::ClusterNode;
use crate::cluster::resolver::{ConnectionResolver, NodeConnection};
use crate::cluster::router::CommandRouter;
use crate::command::{self, CommandDescriptor};
use crate::error::{Result, RouterError};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::debug;

/// Where a batch entry is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The master owning the key's slot
    Key(Bytes),
    Node(ClusterNode),
}

#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub target: Target,
    pub frame: Vec<Bytes>,
}

/// Ordered list of commands submitted together.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    atomic: bool,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch whose per-node shares run inside `MULTI`/`EXEC`.
    pub fn transactional() -> Self {
        Self {
            entries: Vec::new(),
            atomic: true,
        }
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn push_frame(&mut self, target: Target, frame: Vec<Bytes>) {
        self.entries.push(BatchEntry { target, frame });
    }

    pub fn push_for_key<T>(
        &mut self,
        key: Bytes,
        desc: CommandDescriptor<T>,
        args: Vec<Bytes>,
    ) -> Result<()> {
        let frame = desc.frame(args)?;
        self.push_frame(Target::Key(key), frame);
        Ok(())
    }

    pub fn push_for_node<T>(
        &mut self,
        node: ClusterNode,
        desc: CommandDescriptor<T>,
        args: Vec<Bytes>,
    ) -> Result<()> {
        let frame = desc.frame(args)?;
        self.push_frame(Target::Node(node), frame);
        Ok(())
    }
}

/// The node-local share of a batch.
struct NodeGroup {
    addr: String,
    indices: Vec<usize>,
    frames: Vec<Vec<Bytes>>,
}

pub struct BatchExecutor<R> {
    router: CommandRouter<R>,
}

impl<R> Clone for BatchExecutor<R> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
        }
    }
}

impl<R: ConnectionResolver> BatchExecutor<R> {
    pub fn new(router: CommandRouter<R>) -> Self {
        Self { router }
    }

    /// Send every entry and return one reply per entry, in submission order.
    ///
    /// Error replies for individual entries are returned in place. A failed
    /// round trip fails the whole call after every node has finished, with
    /// the error of the node whose share starts earliest in submission
    /// order. Entries already applied are not undone.
    pub async fn execute(&self, batch: Batch) -> Result<Vec<RespValue>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let total = batch.len();
        let atomic = batch.is_atomic();
        let groups = self.group(batch).await?;

        // Every node must be reachable before anything is sent.
        let mut resolved = Vec::with_capacity(groups.len());
        for group in groups {
            let conn = self.router.resolver().resolve_addr(&group.addr)?;
            resolved.push((group, conn));
        }

        debug!(
            "Dispatching batch of {} commands to {} nodes{}",
            total,
            resolved.len(),
            if atomic { " (transactional)" } else { "" }
        );

        let mut tasks = JoinSet::new();
        for (group, conn) in resolved {
            tasks.spawn(async move {
                let NodeGroup {
                    addr,
                    indices,
                    frames,
                } = group;
                let replies = if atomic {
                    run_transaction(conn.as_ref(), frames).await
                } else {
                    conn.pipeline(frames).await
                };
                let replies = replies.and_then(|replies| {
                    if replies.len() == indices.len() {
                        Ok(replies)
                    } else {
                        Err(RouterError::Protocol(format!(
                            "{} sent {} replies for {} commands",
                            addr,
                            replies.len(),
                            indices.len()
                        )))
                    }
                });
                (indices, replies)
            });
        }

        let mut slots: Vec<Option<RespValue>> = vec![None; total];
        // (first index of the failed group, error); the lowest index wins
        let mut first_error: Option<(usize, RouterError)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (position, e) = match joined {
                Ok((indices, Ok(replies))) => {
                    for (idx, reply) in indices.into_iter().zip(replies) {
                        slots[idx] = Some(reply);
                    }
                    continue;
                }
                Ok((indices, Err(e))) => (indices.first().copied().unwrap_or(total), e),
                Err(e) => (
                    total,
                    RouterError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)),
                ),
            };
            if first_error.as_ref().map_or(true, |(first, _)| position < *first) {
                first_error = Some((position, e));
            }
        }
        if let Some((_, e)) = first_error {
            return Err(e);
        }

        slots
            .into_iter()
            .map(|reply| {
                reply.ok_or_else(|| RouterError::Protocol("missing batch reply".to_string()))
            })
            .collect()
    }

    async fn group(&self, batch: Batch) -> Result<Vec<NodeGroup>> {
        let snapshot = self.router.topology().snapshot().await?;
        let mut groups: Vec<NodeGroup> = Vec::new();
        let mut by_addr: HashMap<String, usize> = HashMap::new();

        for (idx, entry) in batch.entries.into_iter().enumerate() {
            let addr = match &entry.target {
                Target::Key(key) => snapshot.node_for_key(key)?.addr(),
                Target::Node(node) => node.addr(),
            };
            let pos = *by_addr.entry(addr.clone()).or_insert_with(|| {
                groups.push(NodeGroup {
                    addr,
                    indices: Vec::new(),
                    frames: Vec::new(),
                });
                groups.len() - 1
            });
            groups[pos].indices.push(idx);
            groups[pos].frames.push(entry.frame);
        }
        Ok(groups)
    }

    /// `DEL` per key; the total number of keys removed.
    pub async fn delete_many(&self, keys: &[Bytes]) -> Result<i64> {
        let mut batch = Batch::new();
        for key in keys {
            batch.push_for_key(key.clone(), command::DEL, vec![key.clone()])?;
        }
        let mut removed = 0;
        for reply in self.execute(batch).await? {
            removed += command::DEL.decode_reply(reply)?;
        }
        Ok(removed)
    }

    /// `GET` per key; values line up with `keys`, `None` for absent keys.
    pub async fn get_many(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>> {
        let mut batch = Batch::new();
        for key in keys {
            batch.push_for_key(key.clone(), command::GET, vec![key.clone()])?;
        }
        self.execute(batch)
            .await?
            .into_iter()
            .map(|reply| command::GET.decode_reply(reply))
            .collect()
    }

    /// `SET` per pair; succeeds once every write has been acknowledged.
    pub async fn set_many(&self, pairs: &[(Bytes, Bytes)]) -> Result<()> {
        let mut batch = Batch::new();
        for (key, value) in pairs {
            batch.push_for_key(key.clone(), command::SET, vec![key.clone(), value.clone()])?;
        }
        for reply in self.execute(batch).await? {
            command::SET.decode_reply(reply)?;
        }
        Ok(())
    }
}

/// Run `frames` between `MULTI` and `EXEC` and unpack the `EXEC` array.
async fn run_transaction<C: NodeConnection>(
    conn: &C,
    frames: Vec<Vec<Bytes>>,
) -> Result<Vec<RespValue>> {
    let mut wrapped = Vec::with_capacity(frames.len() + 2);
    wrapped.push(vec![Bytes::from_static(b"MULTI")]);
    wrapped.extend(frames);
    wrapped.push(vec![Bytes::from_static(b"EXEC")]);

    let mut replies = conn.pipeline(wrapped).await?;
    match replies.pop() {
        Some(RespValue::Array(Some(items))) => Ok(items),
        Some(RespValue::Array(None)) => Err(RouterError::TransactionAborted),
        Some(RespValue::Error(msg)) => Err(RouterError::Server(msg)),
        Some(other) => Err(RouterError::Protocol(format!(
            "unexpected EXEC reply: {}",
            other.type_name()
        ))),
        None => Err(RouterError::Protocol("empty reply to EXEC".to_string())),
    }
}

/// Kind of ambient context currently open on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbientMode {
    Pipeline,
    Transaction,
}

impl AmbientMode {
    fn command_name(self) -> &'static str {
        match self {
            AmbientMode::Pipeline => "PIPELINE",
            AmbientMode::Transaction => "MULTI",
        }
    }
}

/// Commands queued while a pipeline or transaction is open.
///
/// Queued commands have no result of their own; replies become available
/// when the owner takes the batch and executes it.
#[derive(Debug, Default)]
pub struct AmbientContext {
    state: Mutex<Option<(AmbientMode, Batch)>>,
}

impl AmbientContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, mode: AmbientMode) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((current, _)) = state.as_ref() {
            return Err(RouterError::InvalidArgument(format!(
                "{} calls can not be nested inside {}",
                mode.command_name(),
                current.command_name()
            )));
        }
        let batch = match mode {
            AmbientMode::Pipeline => Batch::new(),
            AmbientMode::Transaction => Batch::transactional(),
        };
        *state = Some((mode, batch));
        Ok(())
    }

    pub fn mode(&self) -> Option<AmbientMode> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|(mode, _)| *mode)
    }

    pub fn is_open(&self) -> bool {
        self.mode().is_some()
    }

    /// Queue one command. Returns `false` when no context is open.
    pub fn enqueue(&self, target: Target, frame: Vec<Bytes>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match state.as_mut() {
            Some((_, batch)) => {
                batch.push_frame(target, frame);
                true
            }
            None => false,
        }
    }

    /// Close the context and hand back what was queued.
    pub fn take(&self) -> Option<(AmbientMode, Batch)> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Fail with [`RouterError::UnsupportedInTransaction`] while a context is open.
    pub fn ensure_immediate(&self, name: &str) -> Result<()> {
        if self.is_open() {
            return Err(RouterError::UnsupportedInTransaction(name.to_string()));
        }
        Ok(())
    }
}
