//! In-process mock cluster for integration tests.
//!
//! Each `MockNode` keeps its own keyspace, rejects keys outside its slots
//! with a `MOVED` error like a real node would, and records every command
//! it receives.
#![allow(dead_code)]

use aikv_router::cluster::{key_slot, ConnectionResolver, NodeConnection};
use aikv_router::{RespValue, Result, RouterError};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DUMP_PREFIX: &[u8] = b"DUMP:";

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    ttl_secs: Option<i64>,
}

pub struct MockNode {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub master_id: Option<String>,
    slots: Vec<(u16, u16)>,
    store: Mutex<BTreeMap<Bytes, Entry>>,
    log: Mutex<Vec<Vec<Bytes>>>,
    failures: Mutex<HashMap<String, usize>>,
    delay: Mutex<Option<Duration>>,
    topology: Mutex<String>,
}

fn upper(b: &Bytes) -> String {
    String::from_utf8_lossy(b).to_uppercase()
}

fn text(b: &Bytes) -> String {
    String::from_utf8_lossy(b).into_owned()
}

fn ok() -> RespValue {
    RespValue::ok()
}

fn wrong_args(name: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_lowercase()
    ))
}

/// `*` wildcards only.
fn glob_match(pattern: &[u8], key: &[u8]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((b'*', rest)) => (0..=key.len()).any(|i| glob_match(rest, &key[i..])),
        Some((c, rest)) => key.first() == Some(c) && glob_match(rest, &key[1..]),
    }
}

impl MockNode {
    pub fn new(index: usize, port: u16, slots: Vec<(u16, u16)>, master_id: Option<String>) -> Self {
        Self {
            id: format!("{:040x}", index),
            host: "127.0.0.1".to_string(),
            port,
            master_id,
            slots,
            store: Mutex::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            topology: Mutex::new(String::new()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_master(&self) -> bool {
        self.master_id.is_none()
    }

    pub fn owns(&self, slot: u16) -> bool {
        self.slots.iter().any(|&(s, e)| s <= slot && slot <= e)
    }

    pub fn insert(&self, key: &str, value: &str, ttl_secs: Option<i64>) {
        self.store.lock().unwrap().insert(
            Bytes::from(key.to_string()),
            Entry {
                value: Bytes::from(value.to_string()),
                ttl_secs,
            },
        );
    }

    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.store
            .lock()
            .unwrap()
            .get(key.as_bytes())
            .map(|e| e.value.clone())
    }

    pub fn ttl(&self, key: &str) -> Option<i64> {
        self.store
            .lock()
            .unwrap()
            .get(key.as_bytes())
            .and_then(|e| e.ttl_secs)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.store.lock().unwrap().contains_key(key.as_bytes())
    }

    /// Fail the next `times` commands named `command` with a connection reset.
    pub fn fail_next(&self, command: &str, times: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert(command.to_uppercase(), times);
    }

    /// Hold every pipeline for `delay` before answering it.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Command names received so far, e.g. `["GET", "CLUSTER NODES"]`.
    pub fn commands(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|frame| {
                let name = frame.first().map(upper).unwrap_or_default();
                match name.as_str() {
                    "CLUSTER" | "CONFIG" | "CLIENT" => {
                        format!("{} {}", name, frame.get(1).map(upper).unwrap_or_default())
                    }
                    _ => name,
                }
            })
            .collect()
    }

    pub fn frames(&self) -> Vec<Vec<Bytes>> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }

    fn set_topology(&self, text: String) {
        *self.topology.lock().unwrap() = text;
    }

    fn take_failure(&self, name: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(name) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    /// `None` when every key is served here, or the error to return.
    fn check_keys(&self, keys: &[&Bytes]) -> Option<RespValue> {
        let first = key_slot(keys.first()?);
        if keys.iter().any(|k| key_slot(k) != first) {
            return Some(RespValue::error(
                "CROSSSLOT Keys in request don't hash to the same slot",
            ));
        }
        if !self.owns(first) {
            return Some(RespValue::error(format!("MOVED {} unknown:0", first)));
        }
        None
    }

    fn record(&self, frame: &[Bytes]) {
        self.log.lock().unwrap().push(frame.to_vec());
    }

    fn dispatch(&self, frame: &[Bytes]) -> Result<RespValue> {
        self.record(frame);
        self.run(frame)
    }

    fn run(&self, frame: &[Bytes]) -> Result<RespValue> {
        let name = frame.first().map(upper).unwrap_or_default();
        if self.take_failure(&name) {
            return Err(RouterError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "injected failure",
            )));
        }
        let args = &frame[1.min(frame.len())..];
        Ok(self.handle(&name, args))
    }

    fn handle(&self, name: &str, args: &[Bytes]) -> RespValue {
        match name {
            "GET" | "DUMP" | "TTL" => {
                let [key] = args else { return wrong_args(name) };
                if let Some(err) = self.check_keys(&[key]) {
                    return err;
                }
                let store = self.store.lock().unwrap();
                let entry = store.get(key);
                match name {
                    "GET" => entry.map_or(RespValue::null_bulk(), |e| {
                        RespValue::bulk_string(e.value.clone())
                    }),
                    "DUMP" => entry.map_or(RespValue::null_bulk(), |e| {
                        let mut dumped = DUMP_PREFIX.to_vec();
                        dumped.extend_from_slice(&e.value);
                        RespValue::bulk_string(dumped)
                    }),
                    _ => RespValue::integer(match entry {
                        None => -2,
                        Some(e) => e.ttl_secs.unwrap_or(-1),
                    }),
                }
            }
            "SET" => {
                let [key, value] = args else { return wrong_args(name) };
                if let Some(err) = self.check_keys(&[key]) {
                    return err;
                }
                self.store.lock().unwrap().insert(
                    key.clone(),
                    Entry {
                        value: value.clone(),
                        ttl_secs: None,
                    },
                );
                ok()
            }
            "DEL" | "EXISTS" => {
                if args.is_empty() {
                    return wrong_args(name);
                }
                let keys: Vec<&Bytes> = args.iter().collect();
                if let Some(err) = self.check_keys(&keys) {
                    return err;
                }
                let mut store = self.store.lock().unwrap();
                let count = args
                    .iter()
                    .filter(|k| {
                        if name == "DEL" {
                            store.remove(*k).is_some()
                        } else {
                            store.contains_key(*k)
                        }
                    })
                    .count();
                RespValue::integer(count as i64)
            }
            "RESTORE" => {
                if args.len() < 3 {
                    return wrong_args(name);
                }
                if let Some(err) = self.check_keys(&[&args[0]]) {
                    return err;
                }
                let replace = args[3..].iter().any(|a| upper(a) == "REPLACE");
                let Ok(ttl_ms) = text(&args[1]).parse::<i64>() else {
                    return RespValue::error("ERR Invalid TTL value, must be >= 0");
                };
                let Some(value) = args[2].strip_prefix(DUMP_PREFIX) else {
                    return RespValue::error("ERR DUMP payload version or checksum are wrong");
                };
                let mut store = self.store.lock().unwrap();
                if store.contains_key(&args[0]) && !replace {
                    return RespValue::error("BUSYKEY Target key name already exists.");
                }
                store.insert(
                    args[0].clone(),
                    Entry {
                        value: Bytes::copy_from_slice(value),
                        ttl_secs: (ttl_ms > 0).then_some(ttl_ms / 1000),
                    },
                );
                ok()
            }
            "RENAME" | "RENAMENX" | "COPY" => {
                if args.len() < 2 {
                    return wrong_args(name);
                }
                let (src, dst) = (&args[0], &args[1]);
                if let Some(err) = self.check_keys(&[src, dst]) {
                    return err;
                }
                let mut store = self.store.lock().unwrap();
                let Some(entry) = store.get(src).cloned() else {
                    return match name {
                        "RENAME" => RespValue::error("ERR no such key"),
                        _ => RespValue::integer(0),
                    };
                };
                let replace = args[2..].iter().any(|a| upper(a) == "REPLACE");
                let exists = store.contains_key(dst);
                match name {
                    "RENAME" => {
                        store.remove(src);
                        store.insert(dst.clone(), entry);
                        ok()
                    }
                    "RENAMENX" if exists => RespValue::integer(0),
                    "RENAMENX" => {
                        store.remove(src);
                        store.insert(dst.clone(), entry);
                        RespValue::integer(1)
                    }
                    _ if exists && !replace => RespValue::integer(0),
                    _ => {
                        store.insert(dst.clone(), entry);
                        RespValue::integer(1)
                    }
                }
            }
            "SCAN" => self.scan(args),
            "KEYS" => {
                let [pattern] = args else { return wrong_args(name) };
                let store = self.store.lock().unwrap();
                RespValue::array(
                    store
                        .keys()
                        .filter(|k| glob_match(pattern, k))
                        .map(|k| RespValue::bulk_string(k.clone()))
                        .collect(),
                )
            }
            "RANDOMKEY" => self
                .store
                .lock()
                .unwrap()
                .keys()
                .next()
                .map_or(RespValue::null_bulk(), |k| RespValue::bulk_string(k.clone())),
            "DBSIZE" => RespValue::integer(self.store.lock().unwrap().len() as i64),
            "FLUSHDB" | "FLUSHALL" => {
                self.store.lock().unwrap().clear();
                ok()
            }
            "PING" => RespValue::simple_string("PONG"),
            "SAVE" | "SHUTDOWN" => ok(),
            "BGSAVE" => RespValue::simple_string("Background saving started"),
            "BGREWRITEAOF" => {
                RespValue::simple_string("Background append only file rewriting started")
            }
            "LASTSAVE" => RespValue::integer(1_714_000_000),
            "TIME" => RespValue::array(vec![
                RespValue::bulk_string("1714000000"),
                RespValue::bulk_string("250000"),
            ]),
            "INFO" => RespValue::bulk_string(format!(
                "# Server\r\nredis_version:7.2.4\r\ntcp_port:{}\r\n\r\n# Keyspace\r\ndb0:keys={}\r\n",
                self.port,
                self.store.lock().unwrap().len()
            )),
            "CONFIG" => match args.first().map(upper).as_deref() {
                Some("GET") => RespValue::array(vec![
                    RespValue::bulk_string("maxmemory"),
                    RespValue::bulk_string("0"),
                ]),
                Some("SET") | Some("RESETSTAT") => ok(),
                _ => RespValue::error("ERR unknown CONFIG subcommand"),
            },
            "CLIENT" => RespValue::bulk_string(format!(
                "id=7 addr=127.0.0.1:50100 laddr={} fd=9 name= db=0\n",
                self.addr()
            )),
            "CLUSTER" => self.cluster(args),
            _ => RespValue::error(format!("ERR unknown command '{}'", name)),
        }
    }

    fn scan(&self, args: &[Bytes]) -> RespValue {
        let Some(Ok(cursor)) = args.first().map(|c| text(c).parse::<usize>()) else {
            return RespValue::error("ERR invalid cursor");
        };
        let mut pattern: Option<Bytes> = None;
        let mut count = 10;
        let mut i = 1;
        while i + 1 < args.len() {
            match upper(&args[i]).as_str() {
                "MATCH" => pattern = Some(args[i + 1].clone()),
                "COUNT" => count = text(&args[i + 1]).parse().unwrap_or(10),
                _ => return RespValue::error("ERR syntax error"),
            }
            i += 2;
        }

        let store = self.store.lock().unwrap();
        let all: Vec<&Bytes> = store.keys().collect();
        let end = (cursor + count).min(all.len());
        let keys = all
            .get(cursor..end)
            .unwrap_or(&[])
            .iter()
            .filter(|k| pattern.as_ref().map_or(true, |p| glob_match(p, k)))
            .map(|k| RespValue::bulk_string((*k).clone()))
            .collect();
        let next = if end >= all.len() { 0 } else { end };
        RespValue::array(vec![
            RespValue::bulk_string(next.to_string()),
            RespValue::array(keys),
        ])
    }

    fn cluster(&self, args: &[Bytes]) -> RespValue {
        let sub = args.first().map(upper).unwrap_or_default();
        match sub.as_str() {
            "NODES" => {
                // mark the answering node
                let body = self
                    .topology
                    .lock()
                    .unwrap()
                    .lines()
                    .map(|line| {
                        if line.starts_with(&self.id) {
                            line.replacen(" master ", " myself,master ", 1)
                                .replacen(" slave ", " myself,slave ", 1)
                        } else {
                            line.to_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                RespValue::bulk_string(body)
            }
            "INFO" => RespValue::bulk_string(
                "cluster_state:ok\r\ncluster_slots_assigned:16384\r\ncluster_slots_ok:16384\r\n\
                 cluster_slots_pfail:0\r\ncluster_slots_fail:0\r\ncluster_known_nodes:6\r\n\
                 cluster_size:3\r\ncluster_current_epoch:6\r\ncluster_my_epoch:1\r\n",
            ),
            "KEYSLOT" => match args.get(1) {
                Some(key) => RespValue::integer(key_slot(key) as i64),
                None => wrong_args("cluster|keyslot"),
            },
            "COUNTKEYSINSLOT" | "GETKEYSINSLOT" => {
                let Some(Ok(slot)) = args.get(1).map(|s| text(s).parse::<u16>()) else {
                    return RespValue::error("ERR Invalid slot");
                };
                let store = self.store.lock().unwrap();
                let keys: Vec<&Bytes> = store.keys().filter(|k| key_slot(k) == slot).collect();
                if sub == "COUNTKEYSINSLOT" {
                    RespValue::integer(keys.len() as i64)
                } else {
                    let limit = args
                        .get(2)
                        .and_then(|c| text(c).parse::<usize>().ok())
                        .unwrap_or(0);
                    RespValue::array(
                        keys.into_iter()
                            .take(limit)
                            .map(|k| RespValue::bulk_string(k.clone()))
                            .collect(),
                    )
                }
            }
            "ADDSLOTS" | "DELSLOTS" | "SETSLOT" | "MEET" | "FORGET" | "REPLICATE" => ok(),
            _ => RespValue::error(format!("ERR unknown subcommand '{}'", sub)),
        }
    }
}

impl NodeConnection for MockNode {
    async fn request(&self, frame: Vec<Bytes>) -> Result<RespValue> {
        self.dispatch(&frame)
    }

    async fn pipeline(&self, frames: Vec<Vec<Bytes>>) -> Result<Vec<RespValue>> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut replies = Vec::with_capacity(frames.len());
        let mut queued: Option<Vec<Vec<Bytes>>> = None;
        for frame in frames {
            let name = frame.first().map(upper).unwrap_or_default();
            if let Some(queue) = queued.as_mut() {
                self.record(&frame);
                if name != "EXEC" {
                    queue.push(frame);
                    replies.push(RespValue::simple_string("QUEUED"));
                    continue;
                }
                let mut results = Vec::new();
                for queued_frame in queued.take().unwrap_or_default() {
                    results.push(self.run(&queued_frame)?);
                }
                replies.push(RespValue::array(results));
            } else if name == "MULTI" {
                self.record(&frame);
                queued = Some(Vec::new());
                replies.push(ok());
            } else {
                replies.push(self.dispatch(&frame)?);
            }
        }
        Ok(replies)
    }
}

/// Three masters splitting the slot space evenly, each with one replica.
///
/// | node | port | slots        |
/// |------|------|--------------|
/// | 1    | 7001 | 0-5460       |
/// | 2    | 7002 | 5461-10922   |
/// | 3    | 7003 | 10923-16383  |
///
/// Replicas 4, 5, 6 on ports 7004-7006 follow masters 1, 2, 3.
pub struct MockCluster {
    nodes: Vec<Arc<MockNode>>,
    offline: Mutex<HashSet<String>>,
}

impl MockCluster {
    pub fn new() -> Arc<Self> {
        let masters = vec![
            MockNode::new(1, 7001, vec![(0, 5460)], None),
            MockNode::new(2, 7002, vec![(5461, 10922)], None),
            MockNode::new(3, 7003, vec![(10923, 16383)], None),
        ];
        let replicas: Vec<MockNode> = masters
            .iter()
            .enumerate()
            .map(|(i, m)| MockNode::new(i + 4, m.port + 3, Vec::new(), Some(m.id.clone())))
            .collect();
        Self::from_nodes(masters.into_iter().chain(replicas).collect())
    }

    pub fn from_nodes(nodes: Vec<MockNode>) -> Arc<Self> {
        let cluster = Arc::new(Self {
            nodes: nodes.into_iter().map(Arc::new).collect(),
            offline: Mutex::new(HashSet::new()),
        });
        let text = cluster.nodes_text();
        for node in &cluster.nodes {
            node.set_topology(text.clone());
        }
        cluster
    }

    fn nodes_text(&self) -> String {
        self.nodes
            .iter()
            .map(|n| {
                let role = if n.is_master() { "master" } else { "slave" };
                let slots: Vec<String> = n
                    .slots
                    .iter()
                    .map(|&(s, e)| if s == e { s.to_string() } else { format!("{}-{}", s, e) })
                    .collect();
                format!(
                    "{} {}@{} {} {} 0 0 1 connected {}",
                    n.id,
                    n.addr(),
                    n.port as u32 + 10000,
                    role,
                    n.master_id.as_deref().unwrap_or("-"),
                    slots.join(" ")
                )
                .trim_end()
                .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
            + "\n"
    }

    pub fn nodes(&self) -> &[Arc<MockNode>] {
        &self.nodes
    }

    pub fn node(&self, port: u16) -> Arc<MockNode> {
        self.nodes
            .iter()
            .find(|n| n.port == port)
            .cloned()
            .unwrap_or_else(|| panic!("no mock node on port {}", port))
    }

    /// The master serving `key`.
    pub fn owner(&self, key: &str) -> Arc<MockNode> {
        let slot = key_slot(key.as_bytes());
        self.nodes
            .iter()
            .find(|n| n.is_master() && n.owns(slot))
            .cloned()
            .unwrap_or_else(|| panic!("slot {} unassigned", slot))
    }

    pub fn insert(&self, key: &str, value: &str) {
        self.owner(key).insert(key, value, None);
    }

    pub fn insert_with_ttl(&self, key: &str, value: &str, ttl_secs: i64) {
        self.owner(key).insert(key, value, Some(ttl_secs));
    }

    pub fn value(&self, key: &str) -> Option<Bytes> {
        self.owner(key).value(key)
    }

    pub fn take_offline(&self, port: u16) {
        self.offline.lock().unwrap().insert(self.node(port).addr());
    }

    pub fn clear_logs(&self) {
        for node in &self.nodes {
            node.clear_log();
        }
    }

    /// Every command received by any node, in node order.
    pub fn all_commands(&self) -> Vec<String> {
        self.nodes.iter().flat_map(|n| n.commands()).collect()
    }
}

impl ConnectionResolver for MockCluster {
    type Connection = MockNode;

    fn connection(&self, addr: &str) -> Option<Arc<MockNode>> {
        if self.offline.lock().unwrap().contains(addr) {
            return None;
        }
        self.nodes.iter().find(|n| n.addr() == addr).cloned()
    }

    fn known_addresses(&self) -> Vec<String> {
        let offline = self.offline.lock().unwrap();
        self.nodes
            .iter()
            .map(|n| n.addr())
            .filter(|a| !offline.contains(a))
            .collect()
    }
}
