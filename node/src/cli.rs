//! # CLI Interface
//!
//! Defines the command-line argument structure for `repram-node` using
//! `clap` derive. Every `run` flag can also be supplied through a
//! `REPRAM_*` environment variable, which is how container deployments
//! configure nodes.

use clap::{Parser, Subcommand};
use std::time::Duration;

use repram_core::NodeConfig;

/// REPRAM node.
///
/// An ephemeral, permissionless key/value store node. Values are opaque
/// bytes with a mandatory TTL; writes replicate to a quorum of peers over
/// gossip, reads are served locally, and nothing survives a restart.
#[derive(Parser, Debug)]
#[command(
    name = "repram-node",
    about = "REPRAM ephemeral key/value store node",
    version,
    propagate_version = true
)]
pub struct RepramNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the REPRAM node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Query the status of a running node via its HTTP endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Unique node identifier within the cluster.
    #[arg(long, env = "REPRAM_NODE_ID")]
    pub node_id: String,

    /// Host other nodes use to reach this one.
    #[arg(long, env = "REPRAM_ADDRESS", default_value = "127.0.0.1")]
    pub address: String,

    /// Port for inter-node gossip traffic.
    #[arg(long, env = "REPRAM_GOSSIP_PORT", default_value_t = 9750)]
    pub gossip_port: u16,

    /// Port for the client-facing data API.
    #[arg(long, env = "REPRAM_HTTP_PORT", default_value_t = 9751)]
    pub http_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "REPRAM_METRICS_PORT", default_value_t = 9752)]
    pub metrics_port: u16,

    /// Target number of replicas per key.
    #[arg(long, env = "REPRAM_REPLICATION_FACTOR", default_value_t = 3)]
    pub replication_factor: usize,

    /// Smallest TTL accepted, in seconds. Shorter requests are clamped up.
    #[arg(long, env = "REPRAM_MIN_TTL", default_value_t = 60)]
    pub min_ttl_seconds: u64,

    /// Largest TTL accepted, in seconds. Longer requests are clamped down.
    #[arg(long, env = "REPRAM_MAX_TTL", default_value_t = 86_400)]
    pub max_ttl_seconds: u64,

    /// TTL applied when a request does not specify one, in seconds.
    #[arg(long, env = "REPRAM_DEFAULT_TTL", default_value_t = 3_600)]
    pub default_ttl_seconds: u64,

    /// How long a write waits for quorum, in seconds.
    #[arg(long, env = "REPRAM_WRITE_TIMEOUT", default_value_t = 5)]
    pub write_timeout_seconds: u64,

    /// Total value-byte capacity of the store. 0 means unlimited.
    #[arg(long, env = "REPRAM_MAX_STORE_BYTES", default_value_t = 0)]
    pub max_store_bytes: u64,

    /// Shared HMAC secret for gossip authentication. Empty disables signing
    /// (open mode).
    #[arg(long, env = "REPRAM_CLUSTER_SECRET", default_value = "", hide_env_values = true)]
    pub cluster_secret: String,

    /// Comma-separated `host:port` gossip addresses to contact on startup.
    #[arg(long, env = "REPRAM_BOOTSTRAP_PEERS", value_delimiter = ',')]
    pub bootstrap_peers: Vec<String>,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, env = "REPRAM_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "REPRAM_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

impl RunArgs {
    /// Builds the core configuration from the parsed flags.
    pub fn to_config(&self) -> NodeConfig {
        NodeConfig {
            node_id: self.node_id.clone(),
            address: self.address.clone(),
            gossip_port: self.gossip_port,
            http_port: self.http_port,
            replication_factor: self.replication_factor,
            write_timeout: Duration::from_secs(self.write_timeout_seconds),
            min_ttl: Duration::from_secs(self.min_ttl_seconds),
            max_ttl: Duration::from_secs(self.max_ttl_seconds),
            default_ttl: Duration::from_secs(self.default_ttl_seconds),
            max_store_bytes: self.max_store_bytes,
            cluster_secret: self.cluster_secret.clone(),
            bootstrap_peers: self.bootstrap_peers.clone(),
            ..NodeConfig::default()
        }
    }
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// HTTP endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9751")]
    pub url: String,
}
