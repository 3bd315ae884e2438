//! Cluster administration commands.
//!
//! Client-side wrappers for the `CLUSTER` family: slot assignment, slot
//! migration states, membership changes and slot introspection. Each call
//! is routed to the node the command is meant for.

use crate::cluster::node::{ClusterNode, SlotRange};
use crate::cluster::resolver::ConnectionResolver;
use crate::cluster::router::CommandRouter;
use crate::cluster::slot::SLOT_COUNT;
use crate::command;
use crate::error::{Result, RouterError};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

/// Target state for `CLUSTER SETSLOT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetSlotMode {
    /// Slot is being imported from the given node
    Importing(String),
    /// Slot is being migrated to the given node
    Migrating(String),
    /// Slot is assigned to the given node
    Node(String),
    /// Clear any importing/migrating state
    Stable,
}

impl SetSlotMode {
    fn args(&self) -> Vec<Bytes> {
        match self {
            SetSlotMode::Importing(id) => vec![Bytes::from("IMPORTING"), Bytes::from(id.clone())],
            SetSlotMode::Migrating(id) => vec![Bytes::from("MIGRATING"), Bytes::from(id.clone())],
            SetSlotMode::Node(id) => vec![Bytes::from("NODE"), Bytes::from(id.clone())],
            SetSlotMode::Stable => vec![Bytes::from("STABLE")],
        }
    }
}

/// Decoded `CLUSTER INFO` reply.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClusterInfo {
    /// `ok` or `fail`
    pub state: String,
    pub slots_assigned: usize,
    pub slots_ok: usize,
    pub slots_pfail: usize,
    pub slots_fail: usize,
    pub known_nodes: usize,
    /// Number of masters serving at least one slot
    pub size: usize,
    pub current_epoch: u64,
    /// Every field as returned, including the ones above
    pub fields: HashMap<String, String>,
}

impl ClusterInfo {
    pub fn from_fields(fields: HashMap<String, String>) -> Self {
        fn num<T: std::str::FromStr + Default>(fields: &HashMap<String, String>, key: &str) -> T {
            fields
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default()
        }

        Self {
            state: fields.get("cluster_state").cloned().unwrap_or_default(),
            slots_assigned: num(&fields, "cluster_slots_assigned"),
            slots_ok: num(&fields, "cluster_slots_ok"),
            slots_pfail: num(&fields, "cluster_slots_pfail"),
            slots_fail: num(&fields, "cluster_slots_fail"),
            known_nodes: num(&fields, "cluster_known_nodes"),
            size: num(&fields, "cluster_size"),
            current_epoch: num(&fields, "cluster_current_epoch"),
            fields,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.state == "ok"
    }
}

fn check_slot(slot: u16) -> Result<()> {
    if slot >= SLOT_COUNT {
        return Err(RouterError::InvalidArgument(format!(
            "Invalid slot {} (out of range 0-{})",
            slot,
            SLOT_COUNT - 1
        )));
    }
    Ok(())
}

fn slot_args(slots: &[u16]) -> Result<Vec<Bytes>> {
    slots
        .iter()
        .map(|&slot| {
            check_slot(slot)?;
            Ok(Bytes::from(slot.to_string()))
        })
        .collect()
}

pub struct ClusterCommands<R> {
    router: CommandRouter<R>,
}

impl<R: ConnectionResolver> ClusterCommands<R> {
    pub fn new(router: CommandRouter<R>) -> Self {
        Self { router }
    }

    /// CLUSTER ADDSLOTS on `node`
    pub async fn add_slots(&self, node: &ClusterNode, slots: &[u16]) -> Result<()> {
        let args = slot_args(slots)?;
        self.router
            .execute_on(node, command::CLUSTER_ADDSLOTS, args)
            .await
    }

    pub async fn add_slots_range(&self, node: &ClusterNode, range: SlotRange) -> Result<()> {
        let slots: Vec<u16> = range.slots().collect();
        self.add_slots(node, &slots).await
    }

    /// CLUSTER DELSLOTS on `node`
    pub async fn delete_slots(&self, node: &ClusterNode, slots: &[u16]) -> Result<()> {
        let args = slot_args(slots)?;
        self.router
            .execute_on(node, command::CLUSTER_DELSLOTS, args)
            .await
    }

    pub async fn delete_slots_range(&self, node: &ClusterNode, range: SlotRange) -> Result<()> {
        let slots: Vec<u16> = range.slots().collect();
        self.delete_slots(node, &slots).await
    }

    /// CLUSTER SETSLOT on `node`
    pub async fn set_slot(&self, node: &ClusterNode, slot: u16, mode: SetSlotMode) -> Result<()> {
        check_slot(slot)?;
        let mut args = vec![Bytes::from(slot.to_string())];
        args.extend(mode.args());
        debug!("CLUSTER SETSLOT {} {:?} on {}", slot, mode, node.addr());
        self.router
            .execute_on(node, command::CLUSTER_SETSLOT, args)
            .await
    }

    /// Introduce `node` to the cluster through any known member.
    pub async fn meet(&self, node: &ClusterNode) -> Result<()> {
        if node.host.is_empty() {
            return Err(RouterError::InvalidArgument(
                "Node to meet cluster must have a host".to_string(),
            ));
        }
        if node.port == 0 {
            return Err(RouterError::InvalidArgument(
                "Node to meet cluster must have a port greater than 0".to_string(),
            ));
        }

        let mut args = vec![
            Bytes::from(node.host.clone()),
            Bytes::from(node.port.to_string()),
        ];
        if let Some(bus_port) = node.bus_port {
            args.push(Bytes::from(bus_port.to_string()));
        }
        info!("CLUSTER MEET {}", node.addr());
        self.router.execute_any(command::CLUSTER_MEET, args).await
    }

    /// Remove `node` from every other node's table.
    ///
    /// Stops at the first node that refuses; nodes already told keep the change.
    pub async fn forget(&self, node: &ClusterNode) -> Result<()> {
        let snapshot = self.router.topology().snapshot().await?;
        let id = self.node_id(node).await?;

        for other in snapshot.nodes().iter().filter(|n| n.id != id) {
            self.router
                .execute_on(other, command::CLUSTER_FORGET, vec![Bytes::from(id.clone())])
                .await?;
        }
        info!("Node {} forgotten", id);
        Ok(())
    }

    /// Make `replica` replicate `master`.
    pub async fn replicate(&self, master: &ClusterNode, replica: &ClusterNode) -> Result<()> {
        let master_id = self.node_id(master).await?;
        self.router
            .execute_on(replica, command::CLUSTER_REPLICATE, vec![Bytes::from(master_id)])
            .await
    }

    /// CLUSTER COUNTKEYSINSLOT on the slot owner
    pub async fn count_keys_in_slot(&self, slot: u16) -> Result<i64> {
        check_slot(slot)?;
        let owner = self.slot_owner(slot).await?;
        self.router
            .execute_on(
                &owner,
                command::CLUSTER_COUNTKEYSINSLOT,
                vec![Bytes::from(slot.to_string())],
            )
            .await
    }

    /// CLUSTER GETKEYSINSLOT on the slot owner
    pub async fn get_keys_in_slot(&self, slot: u16, count: usize) -> Result<Vec<Bytes>> {
        check_slot(slot)?;
        let owner = self.slot_owner(slot).await?;
        self.router
            .execute_on(
                &owner,
                command::CLUSTER_GETKEYSINSLOT,
                vec![Bytes::from(slot.to_string()), Bytes::from(count.to_string())],
            )
            .await
    }

    pub async fn cluster_info(&self) -> Result<ClusterInfo> {
        let fields = self
            .router
            .execute_any(command::CLUSTER_INFO, Vec::new())
            .await?;
        Ok(ClusterInfo::from_fields(fields))
    }

    /// Slot of `key` as computed by the server (CLUSTER KEYSLOT).
    pub async fn server_key_slot(&self, key: &[u8]) -> Result<u16> {
        let slot = self
            .router
            .execute_any(command::CLUSTER_KEYSLOT, vec![Bytes::copy_from_slice(key)])
            .await?;
        u16::try_from(slot)
            .ok()
            .filter(|s| *s < SLOT_COUNT)
            .ok_or_else(|| RouterError::Protocol(format!("slot {} out of range", slot)))
    }

    async fn slot_owner(&self, slot: u16) -> Result<ClusterNode> {
        let snapshot = self.router.topology().snapshot().await?;
        snapshot.node_for_slot(slot).cloned()
    }

    /// The node's id, looked up by address when the caller did not supply one.
    async fn node_id(&self, node: &ClusterNode) -> Result<String> {
        if !node.id.is_empty() {
            return Ok(node.id.clone());
        }
        let snapshot = self.router.topology().snapshot().await?;
        snapshot
            .find_by_address(&node.host, node.port)
            .map(|n| n.id.clone())
            .ok_or_else(|| RouterError::InvalidArgument(format!("Unknown node {}", node.addr())))
    }
}
