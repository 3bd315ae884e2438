//! Per-node `SCAN` iteration.
//!
//! A cursor is only meaningful to the node that issued it, so every
//! [`ScanCursor`] stays bound to one node for its whole life.

use crate::cluster::batch::AmbientContext;
use crate::cluster::node::ClusterNode;
use crate::cluster::resolver::ConnectionResolver;
use crate::cluster::router::CommandRouter;
use crate::command::{self, ScanPage};
use crate::error::Result;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Cursor value meaning "not started yet", sent as `0` instead.
pub const DEFAULT_UNINITIALIZED_CURSOR: u64 = 101_010_101_010_101_010;

/// Token with which the store starts and ends an iteration.
const TERMINAL_CURSOR: &str = "0";

/// `MATCH` and `COUNT` options of `SCAN`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub pattern: Option<String>,
    pub count: Option<usize>,
}

impl ScanOptions {
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    fn args(&self, cursor: &str) -> Vec<Bytes> {
        let mut args = vec![Bytes::from(cursor.to_string())];
        if let Some(pattern) = &self.pattern {
            args.push(Bytes::from_static(b"MATCH"));
            args.push(Bytes::from(pattern.clone()));
        }
        if let Some(count) = self.count {
            args.push(Bytes::from_static(b"COUNT"));
            args.push(Bytes::from(count.to_string()));
        }
        args
    }
}

/// Incremental `SCAN` over one node's keyspace.
///
/// The cursor stays bound to the node it was created for, even if that node
/// stops owning slots mid-iteration. Keys present for the whole scan are
/// returned at least once; duplicates are possible.
pub struct ScanCursor<R> {
    router: CommandRouter<R>,
    ambient: Arc<AmbientContext>,
    node: ClusterNode,
    options: ScanOptions,
    cursor: String,
    sentinel: String,
    started: bool,
    finished: bool,
    buffered: VecDeque<Bytes>,
}

impl<R: ConnectionResolver> ScanCursor<R> {
    pub fn new(
        router: CommandRouter<R>,
        ambient: Arc<AmbientContext>,
        node: ClusterNode,
        options: ScanOptions,
    ) -> Self {
        Self {
            router,
            ambient,
            node,
            options,
            cursor: TERMINAL_CURSOR.to_string(),
            sentinel: DEFAULT_UNINITIALIZED_CURSOR.to_string(),
            started: false,
            finished: false,
            buffered: VecDeque::new(),
        }
    }

    /// Start from `cursor` rather than `0`.
    pub fn starting_at(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = cursor.into();
        self
    }

    /// Replace the value treated as "not started".
    pub fn with_sentinel(mut self, sentinel: u64) -> Self {
        self.sentinel = sentinel.to_string();
        self
    }

    pub fn node(&self) -> &ClusterNode {
        &self.node
    }

    /// The token the next page request will send.
    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fetch the next page, or `None` once the node returned the terminal cursor.
    pub async fn next_page(&mut self) -> Result<Option<ScanPage>> {
        if self.finished {
            return Ok(None);
        }
        self.ambient.ensure_immediate(command::SCAN.name)?;

        if !self.started {
            if self.cursor == self.sentinel {
                self.cursor = TERMINAL_CURSOR.to_string();
            }
            self.started = true;
        }

        let args = self.options.args(&self.cursor);
        let page = self
            .router
            .execute_on(&self.node, command::SCAN, args)
            .await?;
        debug!(
            "SCAN {} on {} returned {} keys, next cursor {}",
            self.cursor,
            self.node.addr(),
            page.keys.len(),
            page.cursor
        );

        self.cursor = page.cursor.clone();
        self.finished = page.cursor == TERMINAL_CURSOR;
        Ok(Some(page))
    }

    pub async fn next_key(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(key) = self.buffered.pop_front() {
                return Ok(Some(key));
            }
            match self.next_page().await? {
                Some(page) => self.buffered.extend(page.keys),
                None => return Ok(None),
            }
        }
    }

    /// Drain the remaining iteration into one list.
    pub async fn collect_keys(&mut self) -> Result<Vec<Bytes>> {
        let mut keys: Vec<Bytes> = self.buffered.drain(..).collect();
        while let Some(page) = self.next_page().await? {
            keys.extend(page.keys);
        }
        Ok(keys)
    }
}
