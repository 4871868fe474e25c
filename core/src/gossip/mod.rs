//! # Gossip Layer
//!
//! Everything that moves bytes between nodes: the wire message format, the
//! transport seam, HMAC authentication, and the gossip protocol itself
//! (membership, dedup, fan-out, heartbeats, bootstrap).
//!
//! ```text
//! message.rs    — Wire format: typed messages, node descriptors
//! auth.rs       — HMAC-SHA256 signing/verification over raw message bodies
//! transport.rs  — Unary send seam; HTTP and loopback implementations
//! protocol.rs   — Peer table, seen-cache, broadcast, heartbeat, bootstrap
//! ```
//!
//! The protocol performs no network I/O itself beyond calling the transport;
//! the transport never retries. Replication progress is driven by ACKs at
//! the coordinator layer, not by transport return values.

pub mod auth;
pub mod message;
pub mod protocol;
pub mod transport;

pub use auth::{sign_body, verify_body};
pub use message::{Message, MessageType, NodeInfo};
pub use protocol::{GossipError, GossipProtocol, MessageHandler, Peer, PeerState};
pub use transport::{
    Envelope, GossipTransport, HttpTransport, LoopbackNetwork, LoopbackTransport, TransportError,
    GOSSIP_SIG_HEADER,
};
