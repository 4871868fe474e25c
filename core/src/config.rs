//! # Cluster Configuration & Constants
//!
//! Every protocol constant lives here: timing, fan-out, TTL bounds, ports.
//! Nodes in a cluster are homogeneous — they must agree on the replication
//! factor and TTL bounds, or clients will see different clamping behavior
//! depending on which node they talk to.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// Default number of replicas targeted per key. Quorum is derived from this:
/// `floor(RF/2) + 1`, so RF=3 means a write returns once 2 replicas
/// (including the originator) have acknowledged.
pub const DEFAULT_REPLICATION_FACTOR: usize = 3;

/// How long a write waits for quorum acknowledgements before giving up.
/// The local copy is retained on timeout — replicas can still catch up
/// through re-broadcast.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Gossip
// ---------------------------------------------------------------------------

/// Number of peers each broadcast contacts directly. Rebroadcast hops carry
/// the message to the rest of the cluster.
pub const GOSSIP_FANOUT: usize = 3;

/// Per-send transport timeout. The transport never retries; a slow peer is
/// indistinguishable from a dead one at this layer.
pub const TRANSPORT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Heartbeat period. Every tick, a HEARTBEAT goes to a random peer subset
/// and the peer table is swept for liveness.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A peer silent for this many heartbeat periods is marked suspect.
pub const SUSPECT_AFTER_PERIODS: u32 = 3;

/// A peer silent for this many heartbeat periods is marked dead and removed
/// from the fan-out candidate set.
pub const DEAD_AFTER_PERIODS: u32 = 6;

/// Maximum number of message ids kept for loop suppression. Sized to roughly
/// 10x the expected operation count per propagation window; cache misses on
/// very old messages cost at worst one extra rebroadcast hop.
pub const SEEN_CACHE_CAPACITY: usize = 10_000;

/// Rebroadcast hop budget carried by each message. The seen-cache is the
/// primary termination mechanism; the hop budget bounds propagation even
/// under pathological topologies or cache misses.
pub const MAX_REBROADCAST_HOPS: u8 = 4;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Cadence of the background expiry sweeper. The sweeper is eventual
/// cleanup, not the source of truth — reads check expiry themselves.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Smallest TTL a client can request. Shorter requests are clamped up.
pub const DEFAULT_MIN_TTL: Duration = Duration::from_secs(60);

/// Largest TTL a client can request. Longer requests are clamped down.
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(86_400);

/// TTL applied when a request does not specify one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3_600);

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Default port for inter-node gossip traffic.
pub const DEFAULT_GOSSIP_PORT: u16 = 9750;

/// Default port for the client-facing data API.
pub const DEFAULT_HTTP_PORT: u16 = 9751;

/// Default port for the Prometheus metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9752;

// ---------------------------------------------------------------------------
// Node Configuration
// ---------------------------------------------------------------------------

/// Per-node runtime configuration.
///
/// Populated by the node binary from flags and `REPRAM_*` environment
/// variables. `node_id` is the only field without a usable default — it must
/// be unique within the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier within the cluster.
    pub node_id: String,
    /// Host other nodes use to reach this one.
    pub address: String,
    /// Port for inter-node gossip traffic.
    pub gossip_port: u16,
    /// Port for the client-facing data API.
    pub http_port: u16,
    /// Target number of replicas per key.
    pub replication_factor: usize,
    /// Broadcast fan-out per gossip round.
    pub fanout: usize,
    /// How long a write waits for quorum before returning
    /// `InsufficientReplicas`.
    pub write_timeout: Duration,
    /// Heartbeat period for peer liveness.
    pub heartbeat_interval: Duration,
    /// Lower TTL clamp bound.
    pub min_ttl: Duration,
    /// Upper TTL clamp bound.
    pub max_ttl: Duration,
    /// TTL applied when the request omits one (clamped afterwards).
    pub default_ttl: Duration,
    /// Total value-byte capacity of the store. 0 means unlimited.
    pub max_store_bytes: u64,
    /// Shared HMAC key for gossip authentication. Empty string disables
    /// signing and verification (open mode).
    pub cluster_secret: String,
    /// Initial peers to contact on startup, as `host:port` gossip addresses.
    pub bootstrap_peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            address: "127.0.0.1".to_string(),
            gossip_port: DEFAULT_GOSSIP_PORT,
            http_port: DEFAULT_HTTP_PORT,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            fanout: GOSSIP_FANOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            min_ttl: DEFAULT_MIN_TTL,
            max_ttl: DEFAULT_MAX_TTL,
            default_ttl: DEFAULT_TTL,
            max_store_bytes: 0,
            cluster_secret: String::new(),
            bootstrap_peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Minimal config for a named node. Used heavily in tests.
    pub fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }

    /// Number of acknowledgements (including the local write) required for a
    /// Put to return success: `floor(RF/2) + 1`, never below 1.
    pub fn quorum(&self) -> usize {
        (self.replication_factor / 2 + 1).max(1)
    }

    /// The `host:port` address peers use for gossip traffic.
    pub fn gossip_addr(&self) -> String {
        format!("{}:{}", self.address, self.gossip_port)
    }

    /// Validates invariants that would otherwise surface as confusing
    /// runtime behavior.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        if self.replication_factor == 0 {
            return Err(ConfigError::InvalidReplicationFactor);
        }
        if self.min_ttl > self.max_ttl {
            return Err(ConfigError::InvalidTtlBounds {
                min: self.min_ttl,
                max: self.max_ttl,
            });
        }
        if self.fanout == 0 {
            return Err(ConfigError::InvalidFanout);
        }
        Ok(())
    }
}

/// Errors raised by [`NodeConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `node_id` must be set and unique within the cluster.
    #[error("node_id is required")]
    MissingNodeId,
    /// A replication factor of zero would make every write fail.
    #[error("replication_factor must be at least 1")]
    InvalidReplicationFactor,
    /// The TTL clamp range is empty.
    #[error("min_ttl ({min:?}) exceeds max_ttl ({max:?})")]
    InvalidTtlBounds {
        min: std::time::Duration,
        max: std::time::Duration,
    },
    /// A fan-out of zero would never contact any peer.
    #[error("fanout must be at least 1")]
    InvalidFanout,
}
