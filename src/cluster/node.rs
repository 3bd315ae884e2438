//! Cluster node description, as reported by `CLUSTER NODES`.

use crate::error::{Result, RouterError};
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

use super::slot::SLOT_COUNT;

/// Role of a node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Replica,
}

/// Link state between the reporting node and this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// An inclusive range of hash slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    /// Range `start..=end`; both ends must be valid slots.
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start > end || end >= SLOT_COUNT {
            return Err(RouterError::InvalidArgument(format!(
                "Invalid slot range {}-{} (out of range 0-{})",
                start,
                end,
                SLOT_COUNT - 1
            )));
        }
        Ok(Self { start, end })
    }

    /// A range holding one slot.
    pub fn single(slot: u16) -> Result<Self> {
        Self::new(slot, slot)
    }

    /// Whether `slot` falls inside the range, ends included.
    pub fn contains(&self, slot: u16) -> bool {
        self.start <= slot && slot <= self.end
    }

    pub fn slot_count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Every slot in the range, in order.
    pub fn slots(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl fmt::Display for SlotRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A node of the cluster.
///
/// Equality and hashing use only the node identity, which is stable across
/// topology snapshots even when the address or role changes. Descriptors
/// built from an address alone have no ID and are identified by host and
/// port instead.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterNode {
    /// 40-character node ID, empty for address-only descriptors
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Cluster bus port, when reported
    pub bus_port: Option<u16>,
    /// Announced hostname, when reported
    pub hostname: Option<String>,
    pub role: NodeRole,
    /// ID of the replicated master, `None` for masters
    pub master_id: Option<String>,
    /// Raw flags (`myself`, `master`, `slave`, `fail?`, ...)
    pub flags: Vec<String>,
    pub link_state: LinkState,
    pub config_epoch: u64,
    /// Owned slot ranges; always empty for replicas
    pub slots: Vec<SlotRange>,
}

impl ClusterNode {
    /// Describe a node by address only, for lookups and admin commands.
    pub fn with_address(host: impl Into<String>, port: u16) -> Self {
        Self {
            id: String::new(),
            host: host.into(),
            port,
            bus_port: None,
            hostname: None,
            role: NodeRole::Master,
            master_id: None,
            flags: Vec::new(),
            link_state: LinkState::Connected,
            config_epoch: 0,
            slots: Vec::new(),
        }
    }

    /// `host:port`, the key used to resolve a connection.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    pub fn is_replica(&self) -> bool {
        self.role == NodeRole::Replica
    }

    pub fn is_myself(&self) -> bool {
        self.has_flag("myself")
    }

    /// Marked `fail` or `fail?` by the reporting node.
    pub fn is_failing(&self) -> bool {
        self.has_flag("fail") || self.has_flag("fail?")
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn serves_slot(&self, slot: u16) -> bool {
        self.slots.iter().any(|r| r.contains(slot))
    }

    /// Node ID, or the address for descriptors built without one.
    fn identity(&self) -> (&str, &str, u16) {
        if self.id.is_empty() {
            ("", &self.host, self.port)
        } else {
            (&self.id, "", 0)
        }
    }

    /// Same host and port as `other`.
    pub fn same_address(&self, other: &ClusterNode) -> bool {
        self.host == other.host && self.port == other.port
    }

    /// Parse one line of `CLUSTER NODES` output.
    ///
    /// Format: `<id> <ip:port@cport[,hostname]> <flags> <master> <ping-sent>
    /// <pong-recv> <config-epoch> <link-state> <slot> ... <slot>`.
    ///
    /// Returns `Ok(None)` for nodes that carry no role yet (handshake) and
    /// for nodes without a known address (`noaddr`).
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 8 {
            return Err(malformed(line, "expected at least 8 fields"));
        }

        let id = parts[0].to_string();
        let (host, port, bus_port, hostname) = parse_address(parts[1])
            .ok_or_else(|| malformed(line, "invalid address"))?;

        let flags: Vec<String> = parts[2].split(',').map(str::to_string).collect();
        if flags.iter().any(|f| f == "noaddr") || host.is_empty() || port == 0 {
            debug!("Skipping node {} without an address", id);
            return Ok(None);
        }
        let role = if flags.iter().any(|f| f == "master") {
            NodeRole::Master
        } else if flags.iter().any(|f| f == "slave" || f == "replica") {
            NodeRole::Replica
        } else {
            debug!("Skipping node {} without role flags: {}", id, parts[2]);
            return Ok(None);
        };

        let master_id = match parts[3] {
            "-" => None,
            other => Some(other.to_string()),
        };

        let config_epoch = parts[6]
            .parse::<u64>()
            .map_err(|_| malformed(line, "invalid config epoch"))?;

        let link_state = match parts[7] {
            "connected" => LinkState::Connected,
            "disconnected" => LinkState::Disconnected,
            _ => return Err(malformed(line, "invalid link state")),
        };

        let mut slots = Vec::new();
        for token in &parts[8..] {
            // [slot->-node] / [slot-<-node] are migration markers, not ownership
            if token.starts_with('[') {
                continue;
            }
            slots.push(parse_slot_token(token).ok_or_else(|| malformed(line, "invalid slot"))?);
        }

        Ok(Some(Self {
            id,
            host,
            port,
            bus_port,
            hostname,
            role,
            master_id,
            flags,
            link_state,
            config_epoch,
            slots,
        }))
    }
}

impl PartialEq for ClusterNode {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ClusterNode {}

impl Hash for ClusterNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}", self.addr())
        } else {
            write!(f, "{} ({})", self.addr(), self.id)
        }
    }
}

/// Decode the full `CLUSTER NODES` text.
///
/// Malformed lines are logged and skipped so one bad entry does not hide
/// the rest of the cluster.
pub fn parse_cluster_nodes(text: &str) -> Vec<ClusterNode> {
    let mut nodes = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match ClusterNode::parse_line(line) {
            Ok(Some(node)) => nodes.push(node),
            Ok(None) => {}
            Err(e) => warn!("Ignoring CLUSTER NODES entry: {}", e),
        }
    }
    nodes
}

fn malformed(line: &str, reason: &str) -> RouterError {
    RouterError::Protocol(format!("malformed CLUSTER NODES line ({}): {}", reason, line))
}

/// `ip:port@cport[,hostname]`; older servers omit `@cport`.
fn parse_address(field: &str) -> Option<(String, u16, Option<u16>, Option<String>)> {
    let (addr, hostname) = match field.split_once(',') {
        Some((addr, name)) if !name.is_empty() => (addr, Some(name.to_string())),
        Some((addr, _)) => (addr, None),
        None => (field, None),
    };
    let (host_port, bus_port) = match addr.split_once('@') {
        Some((hp, bus)) => (hp, Some(bus.parse::<u16>().ok()?)),
        None => (addr, None),
    };
    let (host, port) = host_port.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    Some((host.to_string(), port, bus_port, hostname))
}

fn parse_slot_token(token: &str) -> Option<SlotRange> {
    match token.split_once('-') {
        Some((start, end)) => SlotRange::new(start.parse().ok()?, end.parse().ok()?).ok(),
        None => SlotRange::single(token.parse().ok()?).ok(),
    }
}
