//! The cluster connection facade.
//!
//! `ClusterConnection` owns one ambient context. While a pipeline or a
//! transaction is open, multi-key commands are queued instead of sent and
//! return no value; commands that need their reply immediately fail with
//! [`RouterError::UnsupportedInTransaction`].

use crate::cluster::batch::{AmbientContext, AmbientMode, Batch, BatchExecutor, Target};
use crate::cluster::commands::ClusterCommands;
use crate::cluster::node::ClusterNode;
use crate::cluster::rename::{KeyRelocator, RelocationMode};
use crate::cluster::resolver::{ConnectionResolver, NodeResolver};
use crate::cluster::router::CommandRouter;
use crate::cluster::scan::{ScanCursor, ScanOptions};
use crate::cluster::slot::key_slot;
use crate::cluster::topology::{TopologyCache, TopologySnapshot};
use crate::command::{self, ClientInfo, CommandDescriptor};
use crate::config::Config;
use crate::error::{Result, RouterError};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::debug;

pub struct ClusterConnection<R> {
    topology: Arc<TopologyCache<R>>,
    router: CommandRouter<R>,
    batch: BatchExecutor<R>,
    relocator: KeyRelocator<R>,
    admin: ClusterCommands<R>,
    ambient: Arc<AmbientContext>,
    scan_sentinel: u64,
    scan_count: Option<usize>,
}

impl<R: ConnectionResolver> ClusterConnection<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self::with_config(resolver, &Config::default())
    }

    pub fn with_config(resolver: Arc<R>, config: &Config) -> Self {
        let resolver = NodeResolver::new(resolver);
        let topology = Arc::new(TopologyCache::new(resolver.clone()));
        let router = CommandRouter::new(resolver, Arc::clone(&topology));
        Self {
            batch: BatchExecutor::new(router.clone()),
            relocator: KeyRelocator::new(router.clone(), config.relocation.delete_attempts),
            admin: ClusterCommands::new(router.clone()),
            topology,
            router,
            ambient: Arc::new(AmbientContext::new()),
            scan_sentinel: config.scan.uninitialized_cursor,
            scan_count: (config.scan.default_count > 0).then_some(config.scan.default_count),
        }
    }

    pub fn router(&self) -> &CommandRouter<R> {
        &self.router
    }

    /// Slot administration and introspection.
    pub fn cluster(&self) -> &ClusterCommands<R> {
        &self.admin
    }

    // ---- topology ----

    pub async fn refresh_topology(&self) -> Result<Arc<TopologySnapshot>> {
        self.topology.refresh().await
    }

    pub async fn topology(&self) -> Result<Arc<TopologySnapshot>> {
        self.topology.snapshot().await
    }

    pub async fn cluster_nodes(&self) -> Result<Vec<ClusterNode>> {
        Ok(self.topology().await?.nodes().to_vec())
    }

    pub async fn masters(&self) -> Result<Vec<ClusterNode>> {
        Ok(self.topology().await?.masters().cloned().collect())
    }

    pub async fn slaves_of(&self, master: &ClusterNode) -> Result<Vec<ClusterNode>> {
        self.topology().await?.slaves_of(master)
    }

    pub async fn master_slave_map(&self) -> Result<HashMap<ClusterNode, Vec<ClusterNode>>> {
        Ok(self.topology().await?.master_slave_map())
    }

    pub async fn node_for_slot(&self, slot: u16) -> Result<ClusterNode> {
        self.topology().await?.node_for_slot(slot).cloned()
    }

    pub async fn node_for_key(&self, key: &[u8]) -> Result<ClusterNode> {
        self.router.node_for_key(key).await
    }

    pub fn key_slot(&self, key: &[u8]) -> u16 {
        key_slot(key)
    }

    // ---- ambient pipeline / transaction ----

    pub fn open_pipeline(&self) -> Result<()> {
        self.ambient.open(AmbientMode::Pipeline)
    }

    pub fn is_pipelined(&self) -> bool {
        self.ambient.mode() == Some(AmbientMode::Pipeline)
    }

    /// Send everything queued since [`open_pipeline`](Self::open_pipeline).
    pub async fn close_pipeline(&self) -> Result<Vec<RespValue>> {
        let batch = self.take_ambient(AmbientMode::Pipeline, "CLOSE PIPELINE without OPEN")?;
        self.batch.execute(batch).await
    }

    pub fn multi(&self) -> Result<()> {
        self.ambient.open(AmbientMode::Transaction)
    }

    pub fn in_transaction(&self) -> bool {
        self.ambient.mode() == Some(AmbientMode::Transaction)
    }

    /// Run the queued commands, each node's share inside `MULTI`/`EXEC`.
    pub async fn exec(&self) -> Result<Vec<RespValue>> {
        let batch = self.take_ambient(AmbientMode::Transaction, "EXEC without MULTI")?;
        self.batch.execute(batch).await
    }

    pub fn discard(&self) -> Result<()> {
        let batch = self.take_ambient(AmbientMode::Transaction, "DISCARD without MULTI")?;
        debug!("Discarded {} queued commands", batch.len());
        Ok(())
    }

    fn take_ambient(&self, mode: AmbientMode, misuse: &str) -> Result<Batch> {
        if self.ambient.mode() != Some(mode) {
            return Err(RouterError::InvalidArgument(misuse.to_string()));
        }
        self.ambient
            .take()
            .map(|(_, batch)| batch)
            .ok_or_else(|| RouterError::InvalidArgument(misuse.to_string()))
    }

    fn defer<T>(&self, key: &Bytes, desc: CommandDescriptor<T>, args: Vec<Bytes>) -> Result<()> {
        let frame = desc.frame(args)?;
        if !self.ambient.enqueue(Target::Key(key.clone()), frame) {
            return Err(RouterError::InvalidArgument(
                "no pipeline or transaction is open".to_string(),
            ));
        }
        Ok(())
    }

    // ---- multi-key ----

    /// Delete `keys`; the number removed, or `None` when queued.
    pub async fn del(&self, keys: &[Bytes]) -> Result<Option<i64>> {
        if self.ambient.is_open() {
            for key in keys {
                self.defer(key, command::DEL, vec![key.clone()])?;
            }
            return Ok(None);
        }
        self.batch.delete_many(keys).await.map(Some)
    }

    /// Values of `keys` in input order, or `None` when queued.
    pub async fn mget(&self, keys: &[Bytes]) -> Result<Option<Vec<Option<Bytes>>>> {
        if self.ambient.is_open() {
            for key in keys {
                self.defer(key, command::GET, vec![key.clone()])?;
            }
            return Ok(None);
        }
        self.batch.get_many(keys).await.map(Some)
    }

    pub async fn mset(&self, pairs: &[(Bytes, Bytes)]) -> Result<()> {
        if self.ambient.is_open() {
            for (key, value) in pairs {
                self.defer(key, command::SET, vec![key.clone(), value.clone()])?;
            }
            return Ok(());
        }
        self.batch.set_many(pairs).await
    }

    // ---- relocation ----

    pub async fn rename(&self, source: &Bytes, dest: &Bytes) -> Result<()> {
        self.ambient.ensure_immediate(command::RENAME.name)?;
        self.relocator
            .relocate(source, dest, RelocationMode::Rename)
            .await
            .map(|_| ())
    }

    pub async fn rename_nx(&self, source: &Bytes, dest: &Bytes) -> Result<bool> {
        self.ambient.ensure_immediate(command::RENAMENX.name)?;
        self.relocator
            .relocate(source, dest, RelocationMode::RenameIfAbsent)
            .await
    }

    pub async fn copy(&self, source: &Bytes, dest: &Bytes, replace: bool) -> Result<bool> {
        self.ambient.ensure_immediate(command::COPY.name)?;
        self.relocator
            .relocate(source, dest, RelocationMode::Copy { replace })
            .await
    }

    // ---- single key ----

    async fn keyed<T>(&self, key: &Bytes, desc: CommandDescriptor<T>, args: Vec<Bytes>) -> Result<T> {
        self.ambient.ensure_immediate(desc.name)?;
        self.router.execute_for_key(key, desc, args).await
    }

    pub async fn get(&self, key: &Bytes) -> Result<Option<Bytes>> {
        self.keyed(key, command::GET, vec![key.clone()]).await
    }

    /// Returns `false` when the store declined the write.
    pub async fn set(&self, key: &Bytes, value: Bytes) -> Result<bool> {
        self.keyed(key, command::SET, vec![key.clone(), value]).await
    }

    pub async fn exists(&self, key: &Bytes) -> Result<bool> {
        Ok(self.keyed(key, command::EXISTS, vec![key.clone()]).await? > 0)
    }

    /// Remaining lifetime in seconds; `-1` without expiry, `-2` if absent.
    pub async fn ttl(&self, key: &Bytes) -> Result<i64> {
        self.keyed(key, command::TTL, vec![key.clone()]).await
    }

    pub async fn dump(&self, key: &Bytes) -> Result<Option<Bytes>> {
        self.keyed(key, command::DUMP, vec![key.clone()]).await
    }

    /// `ttl_ms == 0` restores without expiry.
    pub async fn restore(&self, key: &Bytes, ttl_ms: u64, value: Bytes, replace: bool) -> Result<()> {
        let mut args = vec![key.clone(), Bytes::from(ttl_ms.to_string()), value];
        if replace {
            args.push(Bytes::from_static(b"REPLACE"));
        }
        self.keyed(key, command::RESTORE, args).await
    }

    // ---- scan ----

    /// Iterate over the keys held by `node`.
    pub fn scan(&self, node: &ClusterNode, options: ScanOptions) -> Result<ScanCursor<R>> {
        self.ambient.ensure_immediate(command::SCAN.name)?;
        let options = ScanOptions {
            count: options.count.or(self.scan_count),
            ..options
        };
        Ok(ScanCursor::new(
            self.router.clone(),
            Arc::clone(&self.ambient),
            node.clone(),
            options,
        )
        .with_sentinel(self.scan_sentinel))
    }

    // ---- per-node commands ----

    pub async fn execute_on<T>(
        &self,
        node: &ClusterNode,
        desc: CommandDescriptor<T>,
        args: Vec<Bytes>,
    ) -> Result<T> {
        self.router.execute_on(node, desc, args).await
    }

    pub async fn ping(&self, node: &ClusterNode) -> Result<String> {
        self.execute_on(node, command::PING, vec![]).await
    }

    pub async fn bg_rewrite_aof(&self, node: &ClusterNode) -> Result<()> {
        self.execute_on(node, command::BGREWRITEAOF, vec![]).await
    }

    pub async fn bg_save(&self, node: &ClusterNode) -> Result<()> {
        self.execute_on(node, command::BGSAVE, vec![]).await
    }

    /// Unix time of the last successful save, in seconds.
    pub async fn last_save(&self, node: &ClusterNode) -> Result<i64> {
        self.execute_on(node, command::LASTSAVE, vec![]).await
    }

    pub async fn save(&self, node: &ClusterNode) -> Result<()> {
        self.execute_on(node, command::SAVE, vec![]).await
    }

    pub async fn db_size(&self, node: &ClusterNode) -> Result<i64> {
        self.execute_on(node, command::DBSIZE, vec![]).await
    }

    pub async fn flush_db(&self, node: &ClusterNode) -> Result<()> {
        self.execute_on(node, command::FLUSHDB, vec![]).await
    }

    pub async fn flush_all(&self, node: &ClusterNode) -> Result<()> {
        self.execute_on(node, command::FLUSHALL, vec![]).await
    }

    pub async fn info(&self, node: &ClusterNode) -> Result<HashMap<String, String>> {
        self.execute_on(node, command::INFO, vec![]).await
    }

    pub async fn info_section(
        &self,
        node: &ClusterNode,
        section: &str,
    ) -> Result<HashMap<String, String>> {
        self.execute_on(node, command::INFO, vec![Bytes::from(section.to_string())])
            .await
    }

    pub async fn keys(&self, node: &ClusterNode, pattern: &str) -> Result<Vec<Bytes>> {
        self.execute_on(node, command::KEYS, vec![Bytes::from(pattern.to_string())])
            .await
    }

    pub async fn random_key(&self, node: &ClusterNode) -> Result<Option<Bytes>> {
        self.execute_on(node, command::RANDOMKEY, vec![]).await
    }

    /// Stop `node`. A connection closed by the server counts as success.
    pub async fn shutdown(&self, node: &ClusterNode) -> Result<()> {
        match self.execute_on(node, command::SHUTDOWN, vec![]).await {
            Err(RouterError::Io(e))
                if matches!(
                    e.kind(),
                    ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
                ) =>
            {
                debug!("{} closed the connection on SHUTDOWN", node.addr());
                Ok(())
            }
            other => other,
        }
    }

    pub async fn config_get(&self, node: &ClusterNode, pattern: &str) -> Result<HashMap<String, String>> {
        self.execute_on(node, command::CONFIG_GET, vec![Bytes::from(pattern.to_string())])
            .await
    }

    pub async fn config_set(&self, node: &ClusterNode, param: &str, value: &str) -> Result<()> {
        self.execute_on(
            node,
            command::CONFIG_SET,
            vec![Bytes::from(param.to_string()), Bytes::from(value.to_string())],
        )
        .await
    }

    pub async fn reset_config_stats(&self, node: &ClusterNode) -> Result<()> {
        self.execute_on(node, command::CONFIG_RESETSTAT, vec![]).await
    }

    /// Server clock in milliseconds.
    pub async fn time(&self, node: &ClusterNode) -> Result<u64> {
        self.execute_on(node, command::TIME, vec![]).await
    }

    pub async fn client_list(&self, node: &ClusterNode) -> Result<Vec<ClientInfo>> {
        self.execute_on(node, command::CLIENT_LIST, vec![]).await
    }
}
