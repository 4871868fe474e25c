//! # Gossip Wire Format
//!
//! Typed messages exchanged between nodes as JSON over the transport. Value
//! bytes travel base64-encoded in the `data` field; the store never sees
//! anything but the decoded bytes.
//!
//! `message_id` is globally unique — `<key>-<nanos>` for data writes, a UUID
//! for everything else — and drives loop suppression. Each message also
//! carries a `hops` budget (decremented on every rebroadcast) so propagation
//! terminates even when the seen-cache misses; peers that omit the field get
//! the default budget on decode.

use serde::{Deserialize, Serialize};

use crate::config::MAX_REBROADCAST_HOPS;

// ---------------------------------------------------------------------------
// Node Descriptor
// ---------------------------------------------------------------------------

/// How a node is reached: its identity plus both listening ports.
///
/// Liveness judgments (`last_seen`, alive/suspect/dead) are local to each
/// observer and never travel on the wire; see
/// [`crate::gossip::protocol::Peer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier within the cluster.
    pub node_id: String,
    /// Reachable host.
    pub host: String,
    /// Inter-node gossip port.
    pub gossip_port: u16,
    /// Client-facing data API port.
    pub http_port: u16,
}

impl NodeInfo {
    /// The `host:port` address gossip traffic is sent to.
    pub fn gossip_addr(&self) -> String {
        format!("{}:{}", self.host, self.gossip_port)
    }
}

// ---------------------------------------------------------------------------
// Message Types
// ---------------------------------------------------------------------------

/// Discriminant for gossip messages. Serialized as the upper-case wire
/// strings peers expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Replicate a write to peers.
    #[serde(rename = "PUT")]
    Put,
    /// Acknowledge a replicated write back to its originator.
    #[serde(rename = "ACK")]
    Ack,
    /// Announce this node to a peer.
    #[serde(rename = "HELLO")]
    Hello,
    /// Share known peers.
    #[serde(rename = "PEER_LIST")]
    PeerList,
    /// Periodic liveness signal.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat,
    /// Ask a bootstrap node for its peer table.
    #[serde(rename = "BOOTSTRAP_REQUEST")]
    BootstrapRequest,
    /// Answer a bootstrap request with a peer list.
    #[serde(rename = "BOOTSTRAP_RESPONSE")]
    BootstrapResponse,
}

impl MessageType {
    /// Wire string for this type. Used in logs and seen-cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Ack => "ACK",
            Self::Hello => "HELLO",
            Self::PeerList => "PEER_LIST",
            Self::Heartbeat => "HEARTBEAT",
            Self::BootstrapRequest => "BOOTSTRAP_REQUEST",
            Self::BootstrapResponse => "BOOTSTRAP_RESPONSE",
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single gossip message.
///
/// Not every field is meaningful for every type: `key`/`data`/`ttl` carry
/// write payloads, `node_info` carries the sender's descriptor on membership
/// messages, and `BOOTSTRAP_RESPONSE` reuses `data` for the JSON-encoded
/// peer list (the `node_info` slot holds exactly one descriptor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message discriminant.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Sending node's id. Preserved across rebroadcasts so ACKs always
    /// reach the originator.
    pub from: String,
    /// Target node id for unicast messages; empty means broadcast.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    /// Key being written or acknowledged.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    /// Opaque payload, base64 on the wire.
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
    /// Entry TTL in seconds, for PUT messages.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub ttl: u64,
    /// Unix timestamp (seconds) at send time. Informational.
    pub timestamp: i64,
    /// Globally unique id driving loop suppression and ACK correlation.
    pub message_id: String,
    /// Sender descriptor, attached to membership messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_info: Option<NodeInfo>,
    /// Remaining rebroadcast budget.
    #[serde(default = "default_hops")]
    pub hops: u8,
}

fn default_hops() -> u8 {
    MAX_REBROADCAST_HOPS
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl Message {
    fn base(msg_type: MessageType, from: impl Into<String>) -> Self {
        Self {
            msg_type,
            from: from.into(),
            to: String::new(),
            key: String::new(),
            data: Vec::new(),
            ttl: 0,
            timestamp: chrono::Utc::now().timestamp(),
            message_id: uuid::Uuid::new_v4().to_string(),
            node_info: None,
            hops: MAX_REBROADCAST_HOPS,
        }
    }

    /// A replicated write. `message_id` is supplied by the coordinator so
    /// ACKs can be correlated with the pending write.
    pub fn put(
        from: impl Into<String>,
        key: impl Into<String>,
        data: Vec<u8>,
        ttl_seconds: u64,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            data,
            ttl: ttl_seconds,
            message_id: message_id.into(),
            ..Self::base(MessageType::Put, from)
        }
    }

    /// An acknowledgement for `message_id`, addressed back to the write's
    /// originator. Carries the same id as the PUT it confirms.
    pub fn ack(
        from: impl Into<String>,
        to: impl Into<String>,
        key: impl Into<String>,
        message_id: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            key: key.into(),
            message_id: message_id.into(),
            ..Self::base(MessageType::Ack, from)
        }
    }

    /// A liveness signal carrying the sender's descriptor.
    pub fn heartbeat(from: impl Into<String>, node_info: NodeInfo) -> Self {
        Self {
            node_info: Some(node_info),
            ..Self::base(MessageType::Heartbeat, from)
        }
    }

    /// A request for a bootstrap node's peer table, carrying the joiner's
    /// descriptor so the bootstrap node learns about it too.
    pub fn bootstrap_request(from: impl Into<String>, node_info: NodeInfo) -> Self {
        Self {
            node_info: Some(node_info),
            ..Self::base(MessageType::BootstrapRequest, from)
        }
    }

    /// A bootstrap answer. The peer list rides JSON-encoded in `data`.
    pub fn bootstrap_response(
        from: impl Into<String>,
        to: impl Into<String>,
        peers: &[NodeInfo],
    ) -> Self {
        Self {
            to: to.into(),
            data: serde_json::to_vec(peers).unwrap_or_default(),
            ..Self::base(MessageType::BootstrapResponse, from)
        }
    }

    /// Decodes the peer list carried by `PEER_LIST` and
    /// `BOOTSTRAP_RESPONSE` messages.
    pub fn peers_from_data(&self) -> Result<Vec<NodeInfo>, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }

    /// Canonical JSON body — the exact bytes that are signed and sent.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parses a message from its wire body.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Consumes the hop budget for one rebroadcast. Returns `None` when the
    /// budget is spent and the message must not be forwarded.
    pub fn decrement_hops(mut self) -> Option<Self> {
        if self.hops > 1 {
            self.hops -= 1;
            Some(self)
        } else {
            None
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
