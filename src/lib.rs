//! Cluster-aware command router for Redis Cluster compatible stores.
//!
//! Keys are mapped to one of 16384 hash slots, slots to the master node that
//! owns them in the last fetched topology, and nodes to live connections
//! supplied by a [`ConnectionResolver`](cluster::ConnectionResolver).
//! Operations the store cannot perform across slots (multi-key commands,
//! rename, copy) are emulated on top of single-slot primitives.

pub mod cluster;
pub mod command;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

pub use cluster::{ClusterConnection, ClusterNode, ScanOptions};
pub use config::Config;
pub use error::{Result, RouterError};
pub use protocol::RespValue;
