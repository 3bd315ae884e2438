//! `aikv-router` command-line client for inspecting and driving a cluster.

use aikv_router::cluster::{ClusterConnection, ClusterNode, ScanOptions};
use aikv_router::transport::TcpResolver;
use aikv_router::Config;
use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Inspect and operate a Redis Cluster through the slot-aware router
#[derive(Parser, Debug)]
#[command(name = "aikv-router", version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed node, overrides `cluster.seeds` (repeatable)
    #[arg(short, long)]
    seed: Vec<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every node of the cluster
    Nodes,
    /// List masters with their replicas
    Masters,
    /// Show the slot and owning master of each key
    Slot { keys: Vec<String> },
    /// Iterate over the keys of one node
    Scan {
        /// Node address, host:port
        node: String,
        #[arg(short, long)]
        pattern: Option<String>,
        #[arg(long)]
        count: Option<usize>,
    },
    /// Rename a key, across slots if needed
    Rename {
        source: String,
        dest: String,
        /// Only if the destination does not exist
        #[arg(long)]
        nx: bool,
    },
    /// Fetch several keys, possibly from different nodes
    Mget { keys: Vec<String> },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if !args.seed.is_empty() {
        config.cluster.seeds = args.seed.clone();
        config.validate()?;
    }
    Ok(config)
}

fn parse_node(addr: &str) -> Result<ClusterNode> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        bail!("expected host:port, got '{}'", addr);
    };
    let port = port
        .parse()
        .with_context(|| format!("invalid port in '{}'", addr))?;
    Ok(ClusterNode::with_address(host, port))
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let resolver = Arc::new(TcpResolver::new(&config.transport));
    resolver.connect_seeds(&config.cluster.seeds).await?;
    let conn = ClusterConnection::with_config(Arc::clone(&resolver), &config);
    let snapshot = conn.refresh_topology().await?;
    resolver.sync(&snapshot).await;
    info!("Connected to cluster with {} nodes", snapshot.nodes().len());

    match args.command {
        Command::Nodes => {
            let nodes = conn.cluster_nodes().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&nodes)?);
            } else {
                for node in nodes {
                    let ranges: Vec<String> = node.slots.iter().map(|r| r.to_string()).collect();
                    println!(
                        "{} {} {:?} {}",
                        node.id,
                        node.addr(),
                        node.role,
                        ranges.join(",")
                    );
                }
            }
        }
        Command::Masters => {
            let mut map: Vec<_> = conn.master_slave_map().await?.into_iter().collect();
            map.sort_by(|a, b| a.0.addr().cmp(&b.0.addr()));
            if args.json {
                let entries: Vec<_> = map
                    .iter()
                    .map(|(master, replicas)| json!({ "master": master, "replicas": replicas }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for (master, replicas) in map {
                    let replicas: Vec<String> = replicas.iter().map(ClusterNode::addr).collect();
                    println!("{} -> [{}]", master.addr(), replicas.join(", "));
                }
            }
        }
        Command::Slot { keys } => {
            let mut rows = Vec::with_capacity(keys.len());
            for key in &keys {
                let slot = conn.key_slot(key.as_bytes());
                let owner = conn.node_for_slot(slot).await?;
                rows.push((key, slot, owner.addr()));
            }
            if args.json {
                let entries: Vec<_> = rows
                    .iter()
                    .map(|(key, slot, owner)| json!({ "key": key, "slot": slot, "node": owner }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for (key, slot, owner) in rows {
                    println!("{} {} {}", key, slot, owner);
                }
            }
        }
        Command::Scan {
            node,
            pattern,
            count,
        } => {
            let node = parse_node(&node)?;
            let node = snapshot
                .find_by_address(&node.host, node.port)
                .cloned()
                .unwrap_or(node);
            let options = ScanOptions { pattern, count };
            let keys = conn.scan(&node, options)?.collect_keys().await?;
            let keys: Vec<String> = keys.iter().map(|k| lossy(k)).collect();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else {
                for key in keys {
                    println!("{}", key);
                }
            }
        }
        Command::Rename { source, dest, nx } => {
            let source = Bytes::from(source);
            let dest = Bytes::from(dest);
            let renamed = if nx {
                conn.rename_nx(&source, &dest).await?
            } else {
                conn.rename(&source, &dest).await?;
                true
            };
            if args.json {
                println!("{}", json!({ "renamed": renamed }));
            } else {
                println!("{}", if renamed { "OK" } else { "not renamed" });
            }
        }
        Command::Mget { keys } => {
            let keys: Vec<Bytes> = keys.into_iter().map(Bytes::from).collect();
            let values = conn.mget(&keys).await?.unwrap_or_default();
            if args.json {
                let values: Vec<Option<String>> =
                    values.iter().map(|v| v.as_deref().map(lossy)).collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for (key, value) in keys.iter().zip(values) {
                    match value {
                        Some(value) => println!("{} {}", lossy(key), lossy(&value)),
                        None => println!("{} (nil)", lossy(key)),
                    }
                }
            }
        }
    }

    Ok(())
}
