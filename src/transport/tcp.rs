//! Plain TCP transport speaking RESP2 to each cluster node.
//!
//! One socket per node address. A request future may be dropped at any
//! await point (timeouts, `select!`, an aborted batch task), so each stream
//! counts the replies it still owes and drains them before the next write.
//! A write that was cut off, or a reply that cannot be decoded, leaves the
//! stream unusable; such connections are marked broken and evicted by
//! [`TcpResolver`], whose next `connect` or `sync` opens a fresh one.

use crate::cluster::{ConnectionResolver, NodeConnection, TopologySnapshot};
use crate::config::TransportConfig;
use crate::error::{Result, RouterError};
use crate::protocol::{decode_frame, encode_command, RespValue};
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Stream {
    socket: TcpStream,
    buffer: BytesMut,
    /// Replies owed to requests whose futures were dropped before reading them.
    pending: usize,
    /// Set while a write is in progress; still set on entry means it was torn.
    writing: bool,
}

impl Stream {
    async fn read_reply(&mut self) -> Result<RespValue> {
        loop {
            if let Some(value) = decode_frame(&mut self.buffer)? {
                self.pending = self.pending.saturating_sub(1);
                return Ok(value);
            }
            if self.socket.read_buf(&mut self.buffer).await? == 0 {
                return Err(RouterError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }
        }
    }

    /// Write `payload` holding `count` commands and read their replies.
    async fn exchange(&mut self, payload: &[u8], count: usize) -> Result<Vec<RespValue>> {
        if self.writing {
            return Err(broken("a previous write was interrupted"));
        }
        if self.pending > 0 {
            debug!("Discarding {} stale replies", self.pending);
        }
        while self.pending > 0 {
            self.read_reply().await?;
        }

        self.writing = true;
        self.socket.write_all(payload).await?;
        self.writing = false;
        self.pending = count;

        let mut replies = Vec::with_capacity(count);
        for _ in 0..count {
            replies.push(self.read_reply().await?);
        }
        Ok(replies)
    }
}

fn broken(reason: &str) -> RouterError {
    RouterError::Io(std::io::Error::new(ErrorKind::BrokenPipe, reason.to_string()))
}

/// A single RESP2 connection.
///
/// Requests are serialized by an async mutex, and replies left unread by a
/// cancelled request are discarded before the next one is sent, so a reply
/// is always handed to the request that sent it.
pub struct TcpConnection {
    addr: String,
    stream: Mutex<Stream>,
    broken: AtomicBool,
}

impl TcpConnection {
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let socket = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                RouterError::Io(std::io::Error::new(
                    ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ))
            })??;
        socket.set_nodelay(true)?;
        debug!("Connected to {}", addr);

        Ok(Self {
            addr: addr.to_string(),
            stream: Mutex::new(Stream {
                socket,
                buffer: BytesMut::with_capacity(4096),
                pending: 0,
                writing: false,
            }),
            broken: AtomicBool::new(false),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// True once an I/O or decode failure left the stream out of step.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    async fn exchange(&self, payload: &[u8], count: usize) -> Result<Vec<RespValue>> {
        if self.is_broken() {
            return Err(broken("connection is broken"));
        }
        let mut stream = self.stream.lock().await;
        let result = stream.exchange(payload, count).await;
        if let Err(e) = &result {
            warn!("Connection to {} is broken: {}", self.addr, e);
            self.broken.store(true, Ordering::Release);
        }
        result
    }
}

impl NodeConnection for TcpConnection {
    async fn request(&self, frame: Vec<Bytes>) -> Result<RespValue> {
        let mut replies = self.exchange(&encode_command(&frame), 1).await?;
        replies
            .pop()
            .ok_or_else(|| RouterError::Protocol("missing reply".to_string()))
    }

    async fn pipeline(&self, frames: Vec<Vec<Bytes>>) -> Result<Vec<RespValue>> {
        let mut out = BytesMut::new();
        for frame in &frames {
            out.extend_from_slice(&encode_command(frame));
        }
        self.exchange(&out, frames.len()).await
    }
}

/// Address-keyed set of [`TcpConnection`]s.
pub struct TcpResolver {
    connections: RwLock<HashMap<String, Arc<TcpConnection>>>,
    connect_timeout: Duration,
}

impl TcpResolver {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Connect to `addr`, reusing an existing connection.
    pub async fn connect(&self, addr: &str) -> Result<Arc<TcpConnection>> {
        if let Some(conn) = self.connection(addr) {
            return Ok(conn);
        }
        let conn = Arc::new(TcpConnection::connect(addr, self.connect_timeout).await?);
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(
            connections.entry(addr.to_string()).or_insert(conn),
        ))
    }

    /// Connect to every reachable seed; fails only if none answers.
    pub async fn connect_seeds(&self, seeds: &[String]) -> Result<()> {
        let mut connected = 0;
        for seed in seeds {
            match self.connect(seed).await {
                Ok(_) => connected += 1,
                Err(e) => warn!("Seed {} unreachable: {}", seed, e),
            }
        }
        if connected == 0 {
            return Err(RouterError::NodeUnavailable(format!(
                "none of the seeds answered: {}",
                seeds.join(", ")
            )));
        }
        Ok(())
    }

    /// Track exactly the nodes listed in `snapshot`.
    ///
    /// Unreachable nodes are logged and left without a connection; commands
    /// for them fail with [`RouterError::NodeUnavailable`].
    pub async fn sync(&self, snapshot: &TopologySnapshot) {
        let wanted: HashSet<String> = snapshot.nodes().iter().map(|n| n.addr()).collect();

        for addr in &wanted {
            if let Err(e) = self.connect(addr).await {
                warn!("Cluster node {} unreachable: {}", addr, e);
            }
        }

        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        connections.retain(|addr, _| wanted.contains(addr));
        info!("Tracking {} cluster node connections", connections.len());
    }

    /// Drop `conn` unless it was already replaced by a newer connection.
    fn evict(&self, conn: &Arc<TcpConnection>) {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if connections
            .get(conn.addr())
            .is_some_and(|current| Arc::ptr_eq(current, conn))
        {
            connections.remove(conn.addr());
            info!("Evicted broken connection to {}", conn.addr());
        }
    }

    pub fn disconnect(&self, addr: &str) -> bool {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(addr)
            .is_some()
    }
}

impl ConnectionResolver for TcpResolver {
    type Connection = TcpConnection;

    fn connection(&self, addr: &str) -> Option<Arc<TcpConnection>> {
        let conn = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .cloned()?;
        if conn.is_broken() {
            self.evict(&conn);
            return None;
        }
        Some(conn)
    }

    fn known_addresses(&self) -> Vec<String> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accepts one connection and answers every command with `+PONG`.
    async fn pong_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                let commands = buf[..n].iter().filter(|b| **b == b'*').count();
                for _ in 0..commands {
                    socket.write_all(b"+PONG\r\n").await.unwrap();
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_request_and_pipeline() {
        let addr = pong_server().await;
        let resolver = TcpResolver::new(&TransportConfig::default());
        let conn = resolver.connect(&addr).await.unwrap();

        let reply = conn.request(vec![Bytes::from("PING")]).await.unwrap();
        assert_eq!(reply, RespValue::simple_string("PONG"));

        let replies = conn
            .pipeline(vec![vec![Bytes::from("PING")], vec![Bytes::from("PING")]])
            .await
            .unwrap();
        assert_eq!(replies.len(), 2);

        assert_eq!(resolver.known_addresses(), vec![addr.clone()]);
        assert!(resolver.disconnect(&addr));
        assert!(resolver.connection(&addr).is_none());
    }

    /// Answers each command with its last argument after `delay`.
    async fn slow_echo_server(delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            loop {
                while let Some(command) = decode_frame(&mut buf).unwrap() {
                    let last = match command {
                        RespValue::Array(Some(mut items)) => items.pop(),
                        _ => None,
                    };
                    let Some(RespValue::BulkString(Some(arg))) = last else {
                        panic!("unexpected command");
                    };
                    tokio::time::sleep(delay).await;
                    let mut reply = format!("${}\r\n", arg.len()).into_bytes();
                    reply.extend_from_slice(&arg);
                    reply.extend_from_slice(b"\r\n");
                    socket.write_all(&reply).await.unwrap();
                }
                if socket.read_buf(&mut buf).await.unwrap() == 0 {
                    break;
                }
            }
        });
        addr
    }

    /// Accepts one connection and answers anything with bytes that are not RESP.
    async fn garbage_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            while socket.read(&mut buf).await.unwrap_or(0) > 0 {
                if socket.write_all(b"?garbage\r\n").await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_cancelled_request_does_not_shift_replies() {
        let addr = slow_echo_server(Duration::from_millis(100)).await;
        let conn = TcpConnection::connect(&addr, Duration::from_secs(1))
            .await
            .unwrap();

        let get = |key: &'static str| vec![Bytes::from("GET"), Bytes::from(key)];
        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), conn.request(get("key-a"))).await;
        assert!(timed_out.is_err());

        let reply = conn.request(get("key-b")).await.unwrap();
        assert_eq!(reply, RespValue::bulk_string("key-b"));
        assert!(!conn.is_broken());

        // same for a pipeline cut off halfway through its replies
        let timed_out = tokio::time::timeout(
            Duration::from_millis(150),
            conn.pipeline(vec![get("p-1"), get("p-2"), get("p-3")]),
        )
        .await;
        assert!(timed_out.is_err());
        let replies = conn.pipeline(vec![get("key-c"), get("key-d")]).await.unwrap();
        assert_eq!(
            replies,
            vec![RespValue::bulk_string("key-c"), RespValue::bulk_string("key-d")]
        );
    }

    #[tokio::test]
    async fn test_undecodable_reply_breaks_and_evicts() {
        let addr = garbage_server().await;
        let resolver = TcpResolver::new(&TransportConfig::default());
        let conn = resolver.connect(&addr).await.unwrap();

        let result = conn.request(vec![Bytes::from("PING")]).await;
        assert!(matches!(result, Err(RouterError::Protocol(_))));
        assert!(conn.is_broken());

        let result = conn.request(vec![Bytes::from("PING")]).await;
        assert!(matches!(result, Err(RouterError::Io(_))));

        assert!(resolver.connection(&addr).is_none());
        assert!(resolver.known_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_connect_seeds_all_down() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let resolver = TcpResolver::new(&TransportConfig::default());
        let result = resolver.connect_seeds(&[addr]).await;
        assert!(matches!(result, Err(RouterError::NodeUnavailable(_))));
    }
}
