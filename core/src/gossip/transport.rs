//! # Gossip Transport
//!
//! A minimal unary send seam between two nodes. The transport does not
//! retry and does not interpret message contents; it moves a signed body to
//! a peer and reports whether that worked. The protocol decides what a
//! failure means.
//!
//! Two implementations ship with the core: [`HttpTransport`] POSTs the body
//! to `/gossip/message` on the peer, and [`LoopbackTransport`] delivers
//! in-process for tests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::config::TRANSPORT_SEND_TIMEOUT;
use crate::gossip::message::NodeInfo;

/// Header carrying the base64 HMAC signature of the request body.
pub const GOSSIP_SIG_HEADER: &str = "x-gossip-sig";

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// A serialized message plus its signature, ready to send. The body is
/// reference-counted so one fan-out broadcast serializes and signs exactly
/// once.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Canonical message bytes — exactly what was signed.
    pub body: Bytes,
    /// Base64 HMAC signature; `None` in open mode.
    pub signature: Option<String>,
}

impl Envelope {
    /// Wraps a serialized body and optional signature.
    pub fn new(body: Vec<u8>, signature: Option<String>) -> Self {
        Self {
            body: Bytes::from(body),
            signature,
        }
    }
}

/// Transport-level failures. Logged and counted by callers, never surfaced
/// to data-API clients.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection failed or the peer has no listener.
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable {
        /// Gossip address of the peer.
        peer: String,
        /// Underlying cause, stringified.
        reason: String,
    },
    /// The send did not complete within the per-send timeout.
    #[error("send to {peer} timed out")]
    Timeout {
        /// Gossip address of the peer.
        peer: String,
    },
    /// The peer answered with a non-success status (e.g. a signature
    /// rejection).
    #[error("peer {peer} rejected message: http {status}")]
    Rejected {
        /// Gossip address of the peer.
        peer: String,
        /// HTTP status returned.
        status: u16,
    },
}

/// Unary request/response channel to a peer.
#[async_trait]
pub trait GossipTransport: Send + Sync {
    /// Delivers `envelope` to `peer`. One attempt, bounded by the
    /// transport's own timeout.
    async fn send(&self, peer: &NodeInfo, envelope: Envelope) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// HTTP Transport
// ---------------------------------------------------------------------------

/// Sends gossip as `POST http://{peer}/gossip/message` with the signature in
/// the [`GOSSIP_SIG_HEADER`] header.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds the transport with the per-send timeout baked into the client.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(TRANSPORT_SEND_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static config");
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GossipTransport for HttpTransport {
    async fn send(&self, peer: &NodeInfo, envelope: Envelope) -> Result<(), TransportError> {
        let addr = peer.gossip_addr();
        let url = format!("http://{addr}/gossip/message");

        let mut request = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(envelope.body.clone());
        if let Some(sig) = &envelope.signature {
            request = request.header(GOSSIP_SIG_HEADER, sig);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                trace!(peer = %addr, "gossip message delivered");
                Ok(())
            }
            Ok(response) => Err(TransportError::Rejected {
                peer: addr,
                status: response.status().as_u16(),
            }),
            Err(e) if e.is_timeout() => Err(TransportError::Timeout { peer: addr }),
            Err(e) => Err(TransportError::Unreachable {
                peer: addr,
                reason: e.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Loopback Transport
// ---------------------------------------------------------------------------

/// In-process message fabric for tests. Nodes register an inbox under their
/// gossip address; sends to unregistered addresses fail like a connection
/// refusal, and a registered node can be disconnected mid-test to simulate
/// a partition.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inboxes: Arc<DashMap<String, mpsc::UnboundedSender<Envelope>>>,
}

impl LoopbackNetwork {
    /// An empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr` and returns the receiving end of its inbox.
    pub fn register(&self, addr: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(addr.to_string(), tx);
        rx
    }

    /// Removes `addr` from the fabric; subsequent sends to it fail.
    pub fn disconnect(&self, addr: &str) {
        self.inboxes.remove(addr);
    }

    /// A transport handle onto this fabric.
    pub fn transport(&self) -> LoopbackTransport {
        LoopbackTransport { net: self.clone() }
    }
}

/// Sender side of a [`LoopbackNetwork`].
#[derive(Clone)]
pub struct LoopbackTransport {
    net: LoopbackNetwork,
}

#[async_trait]
impl GossipTransport for LoopbackTransport {
    async fn send(&self, peer: &NodeInfo, envelope: Envelope) -> Result<(), TransportError> {
        let addr = peer.gossip_addr();
        let delivered = self
            .net
            .inboxes
            .get(&addr)
            .map(|tx| tx.send(envelope).is_ok())
            .unwrap_or(false);

        if delivered {
            Ok(())
        } else {
            Err(TransportError::Unreachable {
                peer: addr,
                reason: "no listener registered".to_string(),
            })
        }
    }
}
