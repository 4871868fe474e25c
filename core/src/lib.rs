// Copyright (c) 2026 REPRAM Contributors. MIT License.
// See LICENSE for details.

//! # REPRAM — Cluster Core
//!
//! REPRAM is an ephemeral, permissionless key/value store distributed across
//! a cluster of homogeneous nodes. Every key carries a mandatory time-to-live
//! after which the value is irrevocably deleted from the network. Nodes treat
//! values as opaque bytes — they never parse, inspect, or interpret them —
//! so the only privacy guarantee at the node level comes from forgetting.
//!
//! This crate is the cluster core: everything that makes REPRAM more than a
//! memory-backed dictionary. The HTTP request surface lives in the
//! `repram-node` binary, which is a thin adapter over these components.
//!
//! ## Architecture
//!
//! ```text
//! store.rs       — In-memory TTL store with byte-accurate capacity accounting
//! gossip/        — Message types, transports, HMAC auth, gossip protocol
//! cluster.rs     — Quorum-replicated write coordinator (Put/Get/Scan)
//! config.rs      — Protocol constants and node configuration
//! clock.rs       — Injectable time source for TTL and expiry logic
//! ```
//!
//! A write is a cross-component protocol, not a local operation:
//!
//! ```text
//! Cluster::put ──► Store::put (local) ──► GossipProtocol::broadcast (peers)
//!                                              │
//!      peer Cluster::handle_put ◄── transport ─┘
//!              │
//!              └──► peer Store::put ──► ACK ──► originator confirmation
//!                                               counter ──► quorum ──► ok
//! ```
//!
//! ## Design Decisions
//!
//! - Reads are local-only: any live replica can answer, staleness is bounded
//!   by gossip propagation latency. Last write observed at each node wins.
//! - Pending writes are keyed by `message_id`, never by key, so back-to-back
//!   writes to the same key from the same client cannot clash.
//! - The store owns all value bytes. Callers get copies in both directions;
//!   no component holds an alias into store memory.
//! - Nothing is persisted. A restart loses all data, by design.

pub mod clock;
pub mod cluster;
pub mod config;
pub mod gossip;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::{Cluster, ClusterError};
pub use config::{ConfigError, NodeConfig};
pub use gossip::auth::{sign_body, verify_body};
pub use gossip::message::{Message, MessageType, NodeInfo};
pub use gossip::protocol::{GossipError, GossipProtocol, MessageHandler, Peer, PeerState};
pub use gossip::transport::{
    Envelope, GossipTransport, HttpTransport, LoopbackNetwork, LoopbackTransport, TransportError,
    GOSSIP_SIG_HEADER,
};
pub use store::{EntryMetadata, Store, StoreError, StoreStats};
