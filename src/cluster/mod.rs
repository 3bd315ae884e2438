//! Cluster-aware command routing.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            ClusterConnection                │
//! │  (ambient pipeline / MULTI, admin, scan)    │
//! └─────────────────────────────────────────────┘
//!          │                │               │
//!          ▼                ▼               ▼
//!   BatchExecutor     KeyRelocator     ScanCursor
//!          │                │               │
//!          └───────► CommandRouter ◄────────┘
//!                     │          │
//!                     ▼          ▼
//!              TopologyCache  NodeResolver
//!                     │          │
//!                     ▼          ▼
//!                key_slot   ConnectionResolver (transport)
//! ```

mod batch;
mod commands;
mod connection;
pub mod node;
mod rename;
pub mod resolver;
mod router;
mod scan;
pub mod slot;
mod topology;

pub use batch::{AmbientContext, AmbientMode, Batch, BatchEntry, BatchExecutor, Target};
pub use commands::{ClusterCommands, ClusterInfo, SetSlotMode};
pub use connection::ClusterConnection;
pub use node::{parse_cluster_nodes, ClusterNode, LinkState, NodeRole, SlotRange};
pub use rename::{KeyRelocator, RelocationMode};
pub use resolver::{ConnectionResolver, NodeConnection, NodeResolver};
pub use router::CommandRouter;
pub use scan::{ScanCursor, ScanOptions, DEFAULT_UNINITIALIZED_CURSOR};
pub use slot::{hash_tag, key_slot, same_slot, SLOT_COUNT};
pub use topology::{TopologyCache, TopologySnapshot};
