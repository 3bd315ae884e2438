//! Default transport: one TCP stream per node.
//!
//! Anything implementing [`ConnectionResolver`](crate::cluster::ConnectionResolver)
//! can replace it; the router does not depend on this module.

mod tcp;

pub use tcp::{TcpConnection, TcpResolver};
