//! Command descriptors.
//!
//! A descriptor is an immutable `(name, subcommand, arity, decoder)` value
//! defined once as a `const` and passed by value wherever a command is sent.

pub mod decode;

use crate::cluster::ClusterNode;
use crate::error::{Result, RouterError};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;

pub use decode::{ClientInfo, ScanPage};

use decode::*;

/// Accepted argument count, not counting the command name or subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

/// Static description of a command and how to decode its reply.
pub struct CommandDescriptor<T> {
    pub name: &'static str,
    pub subcommand: Option<&'static str>,
    pub arity: Arity,
    pub decode: fn(RespValue) -> Result<T>,
}

impl<T> Clone for CommandDescriptor<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CommandDescriptor<T> {}

impl<T> std::fmt::Debug for CommandDescriptor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("name", &self.name)
            .field("subcommand", &self.subcommand)
            .field("arity", &self.arity)
            .finish()
    }
}

impl<T> CommandDescriptor<T> {
    pub const fn new(name: &'static str, arity: Arity, decode: fn(RespValue) -> Result<T>) -> Self {
        Self {
            name,
            subcommand: None,
            arity,
            decode,
        }
    }

    pub const fn with_subcommand(
        name: &'static str,
        subcommand: &'static str,
        arity: Arity,
        decode: fn(RespValue) -> Result<T>,
    ) -> Self {
        Self {
            name,
            subcommand: Some(subcommand),
            arity,
            decode,
        }
    }

    /// `NAME` or `NAME SUB`, as shown in error messages.
    pub fn full_name(&self) -> String {
        match self.subcommand {
            Some(sub) => format!("{} {}", self.name, sub),
            None => self.name.to_string(),
        }
    }

    /// Build the wire frame, rejecting argument counts the command cannot take.
    pub fn frame(&self, args: Vec<Bytes>) -> Result<Vec<Bytes>> {
        if !self.arity.accepts(args.len()) {
            return Err(RouterError::WrongArgCount(self.full_name()));
        }
        let mut frame = Vec::with_capacity(args.len() + 2);
        frame.push(Bytes::from_static(self.name.as_bytes()));
        if let Some(sub) = self.subcommand {
            frame.push(Bytes::from_static(sub.as_bytes()));
        }
        frame.extend(args);
        Ok(frame)
    }

    /// Decode a reply; error replies become [`RouterError::Server`].
    pub fn decode_reply(&self, reply: RespValue) -> Result<T> {
        match reply {
            RespValue::Error(msg) => Err(RouterError::Server(msg)),
            other => (self.decode)(other),
        }
    }
}

// Cluster administration
pub const CLUSTER_NODES: CommandDescriptor<Vec<ClusterNode>> =
    CommandDescriptor::with_subcommand("CLUSTER", "NODES", Arity::Exact(0), decode_cluster_nodes);
pub const CLUSTER_INFO: CommandDescriptor<HashMap<String, String>> =
    CommandDescriptor::with_subcommand("CLUSTER", "INFO", Arity::Exact(0), decode_info);
pub const CLUSTER_ADDSLOTS: CommandDescriptor<()> =
    CommandDescriptor::with_subcommand("CLUSTER", "ADDSLOTS", Arity::AtLeast(1), decode_status);
pub const CLUSTER_DELSLOTS: CommandDescriptor<()> =
    CommandDescriptor::with_subcommand("CLUSTER", "DELSLOTS", Arity::AtLeast(1), decode_status);
pub const CLUSTER_SETSLOT: CommandDescriptor<()> =
    CommandDescriptor::with_subcommand("CLUSTER", "SETSLOT", Arity::AtLeast(2), decode_status);
pub const CLUSTER_FORGET: CommandDescriptor<()> =
    CommandDescriptor::with_subcommand("CLUSTER", "FORGET", Arity::Exact(1), decode_status);
pub const CLUSTER_MEET: CommandDescriptor<()> =
    CommandDescriptor::with_subcommand("CLUSTER", "MEET", Arity::AtLeast(2), decode_status);
pub const CLUSTER_REPLICATE: CommandDescriptor<()> =
    CommandDescriptor::with_subcommand("CLUSTER", "REPLICATE", Arity::Exact(1), decode_status);
pub const CLUSTER_COUNTKEYSINSLOT: CommandDescriptor<i64> = CommandDescriptor::with_subcommand(
    "CLUSTER",
    "COUNTKEYSINSLOT",
    Arity::Exact(1),
    decode_integer,
);
pub const CLUSTER_GETKEYSINSLOT: CommandDescriptor<Vec<Bytes>> = CommandDescriptor::with_subcommand(
    "CLUSTER",
    "GETKEYSINSLOT",
    Arity::Exact(2),
    decode_key_list,
);
pub const CLUSTER_KEYSLOT: CommandDescriptor<i64> =
    CommandDescriptor::with_subcommand("CLUSTER", "KEYSLOT", Arity::Exact(1), decode_integer);

// Keyspace
pub const SCAN: CommandDescriptor<ScanPage> =
    CommandDescriptor::new("SCAN", Arity::AtLeast(1), decode_scan_page);
pub const DUMP: CommandDescriptor<Option<Bytes>> =
    CommandDescriptor::new("DUMP", Arity::Exact(1), decode_optional_bytes);
pub const RESTORE: CommandDescriptor<()> =
    CommandDescriptor::new("RESTORE", Arity::AtLeast(3), decode_status);
pub const RENAME: CommandDescriptor<()> =
    CommandDescriptor::new("RENAME", Arity::Exact(2), decode_status);
pub const RENAMENX: CommandDescriptor<bool> =
    CommandDescriptor::new("RENAMENX", Arity::Exact(2), decode_bool);
pub const COPY: CommandDescriptor<bool> =
    CommandDescriptor::new("COPY", Arity::AtLeast(2), decode_bool);
pub const GET: CommandDescriptor<Option<Bytes>> =
    CommandDescriptor::new("GET", Arity::Exact(1), decode_optional_bytes);
pub const SET: CommandDescriptor<bool> =
    CommandDescriptor::new("SET", Arity::AtLeast(2), decode_set_reply);
pub const DEL: CommandDescriptor<i64> =
    CommandDescriptor::new("DEL", Arity::AtLeast(1), decode_integer);
pub const EXISTS: CommandDescriptor<i64> =
    CommandDescriptor::new("EXISTS", Arity::AtLeast(1), decode_integer);
pub const TTL: CommandDescriptor<i64> =
    CommandDescriptor::new("TTL", Arity::Exact(1), decode_integer);
pub const KEYS: CommandDescriptor<Vec<Bytes>> =
    CommandDescriptor::new("KEYS", Arity::Exact(1), decode_key_list);
pub const RANDOMKEY: CommandDescriptor<Option<Bytes>> =
    CommandDescriptor::new("RANDOMKEY", Arity::Exact(0), decode_optional_bytes);

// Per-node server commands
pub const PING: CommandDescriptor<String> =
    CommandDescriptor::new("PING", Arity::Exact(0), decode_string);
pub const BGREWRITEAOF: CommandDescriptor<()> =
    CommandDescriptor::new("BGREWRITEAOF", Arity::Exact(0), decode_status);
pub const BGSAVE: CommandDescriptor<()> =
    CommandDescriptor::new("BGSAVE", Arity::Exact(0), decode_status);
pub const LASTSAVE: CommandDescriptor<i64> =
    CommandDescriptor::new("LASTSAVE", Arity::Exact(0), decode_integer);
pub const SAVE: CommandDescriptor<()> =
    CommandDescriptor::new("SAVE", Arity::Exact(0), decode_status);
pub const DBSIZE: CommandDescriptor<i64> =
    CommandDescriptor::new("DBSIZE", Arity::Exact(0), decode_integer);
pub const FLUSHDB: CommandDescriptor<()> =
    CommandDescriptor::new("FLUSHDB", Arity::Exact(0), decode_status);
pub const FLUSHALL: CommandDescriptor<()> =
    CommandDescriptor::new("FLUSHALL", Arity::Exact(0), decode_status);
pub const INFO: CommandDescriptor<HashMap<String, String>> =
    CommandDescriptor::new("INFO", Arity::AtLeast(0), decode_info);
pub const SHUTDOWN: CommandDescriptor<()> =
    CommandDescriptor::new("SHUTDOWN", Arity::AtLeast(0), decode_status);
pub const CONFIG_GET: CommandDescriptor<HashMap<String, String>> =
    CommandDescriptor::with_subcommand("CONFIG", "GET", Arity::Exact(1), decode_config_pairs);
pub const CONFIG_SET: CommandDescriptor<()> =
    CommandDescriptor::with_subcommand("CONFIG", "SET", Arity::Exact(2), decode_status);
pub const CONFIG_RESETSTAT: CommandDescriptor<()> =
    CommandDescriptor::with_subcommand("CONFIG", "RESETSTAT", Arity::Exact(0), decode_status);
pub const TIME: CommandDescriptor<u64> =
    CommandDescriptor::new("TIME", Arity::Exact(0), decode_time_millis);
pub const CLIENT_LIST: CommandDescriptor<Vec<ClientInfo>> =
    CommandDescriptor::with_subcommand("CLIENT", "LIST", Arity::Exact(0), decode_client_list);
