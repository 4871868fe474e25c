//! # Gossip Protocol
//!
//! Epidemic propagation of writes and acknowledgements. A broadcast contacts
//! a random fan-out sample of peers; each receiving node re-broadcasts PUT
//! messages to its own sample, so a write reaches nodes the originator never
//! contacted directly.
//!
//! ## Loop suppression
//!
//! Every processed message is remembered in a bounded seen-cache. The cache
//! key scopes `message_id` by type and sender, because ACKs deliberately
//! reuse the PUT's id — two replicas acknowledging the same write must both
//! get through, while a replayed ACK from the same replica must not.
//! A `hops` budget on each message bounds propagation even on cache misses.
//!
//! ## Membership
//!
//! Peers arrive via bootstrap and via descriptors attached to membership
//! messages. Every authenticated message refreshes its sender's liveness.
//! A peer silent for three heartbeat periods is marked suspect; after six it
//! is dead and removed from the fan-out candidate set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::{NodeConfig, DEAD_AFTER_PERIODS, SEEN_CACHE_CAPACITY, SUSPECT_AFTER_PERIODS};
use crate::gossip::auth::{sign_body, verify_body};
use crate::gossip::message::{Message, MessageType, NodeInfo};
use crate::gossip::transport::{Envelope, GossipTransport};

// ---------------------------------------------------------------------------
// Peers
// ---------------------------------------------------------------------------

/// Local liveness judgment about a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// Heard from recently.
    Alive,
    /// Silent for at least three heartbeat periods.
    Suspect,
    /// Silent for at least six heartbeat periods. Dead peers are removed
    /// from the table rather than kept as tombstones.
    Dead,
}

/// A known peer: its descriptor plus this node's view of its liveness.
#[derive(Debug, Clone)]
pub struct Peer {
    /// How to reach the peer.
    pub info: NodeInfo,
    /// Last time any message arrived from this peer.
    pub last_seen: Instant,
    /// Current liveness judgment.
    pub state: PeerState,
}

// ---------------------------------------------------------------------------
// Handler seam
// ---------------------------------------------------------------------------

/// Receives messages that survived authentication and dedup. The cluster
/// coordinator implements this to route PUT/ACK traffic; it hands membership
/// types back via [`GossipProtocol::handle_membership`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one inbound message.
    async fn on_message(&self, message: Message) -> Result<(), GossipError>;
}

/// Protocol-level failures. Transport errors are absorbed (logged) and never
/// appear here.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    /// Inbound body failed HMAC verification.
    #[error("gossip signature verification failed")]
    AuthenticationFailed,
    /// Inbound body or embedded peer list did not parse.
    #[error("malformed gossip message: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// The gossip engine for one node.
///
/// Owns the peer table and seen-cache; performs I/O only through the
/// injected transport. Send failures are logged, never propagated —
/// replication progress is driven by ACKs at the coordinator, not by
/// transport return values.
pub struct GossipProtocol {
    local: NodeInfo,
    fanout: usize,
    cluster_secret: String,
    heartbeat_interval: Duration,
    seen_capacity: usize,
    peers: RwLock<HashMap<String, Peer>>,
    seen: DashMap<String, Instant>,
    handler: RwLock<Option<Weak<dyn MessageHandler>>>,
    transport: Arc<dyn GossipTransport>,
    send_failures: AtomicU64,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl GossipProtocol {
    /// Creates the protocol for `local`, configured from `config`.
    pub fn new(
        local: NodeInfo,
        config: &NodeConfig,
        transport: Arc<dyn GossipTransport>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            local,
            fanout: config.fanout,
            cluster_secret: config.cluster_secret.clone(),
            heartbeat_interval: config.heartbeat_interval,
            seen_capacity: SEEN_CACHE_CAPACITY,
            peers: RwLock::new(HashMap::new()),
            seen: DashMap::new(),
            handler: RwLock::new(None),
            transport,
            send_failures: AtomicU64::new(0),
            shutdown,
            stopped: AtomicBool::new(false),
        }
    }

    /// This node's own descriptor.
    pub fn local(&self) -> &NodeInfo {
        &self.local
    }

    /// Registers the inbound message handler. Held weakly so the handler and
    /// protocol may reference each other without leaking.
    pub fn set_handler(&self, handler: Weak<dyn MessageHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Joins the cluster: sends a `BOOTSTRAP_REQUEST` to every bootstrap
    /// address and starts the heartbeat loop.
    pub async fn start(self: &Arc<Self>, bootstrap: &[String]) {
        for addr in bootstrap {
            let Some(target) = parse_gossip_addr(addr) else {
                warn!(addr = %addr, "skipping malformed bootstrap address");
                continue;
            };
            let request =
                Message::bootstrap_request(self.local.node_id.clone(), self.local.clone());
            if let Err(e) = self.send_to(&target, request).await {
                warn!(addr = %addr, error = %e, "bootstrap request failed");
            }
        }

        let protocol = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(protocol.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        protocol.sweep_liveness();
                        protocol.send_heartbeats().await;
                    }
                    _ = shutdown.changed() => {
                        debug!("gossip heartbeat loop stopped");
                        break;
                    }
                }
            }
        });

        info!(
            node_id = %self.local.node_id,
            bootstrap = bootstrap.len(),
            "gossip protocol started"
        );
    }

    /// Stops background loops. Idempotent; in-flight sends are allowed to
    /// finish.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown.send(true);
        }
    }

    // -- outbound ----------------------------------------------------------

    /// Broadcasts `message` to a random fan-out sample of live peers.
    /// Returns the number of peers contacted. Send failures are logged and
    /// do not fail the broadcast.
    pub async fn broadcast(&self, mut message: Message) -> usize {
        if message.from.is_empty() {
            message.from = self.local.node_id.clone();
        }
        if message.message_id.is_empty() {
            message.message_id = uuid::Uuid::new_v4().to_string();
        }

        // Mark our own message seen so its rebroadcast echo is dropped.
        self.note_seen(seen_key(&message));

        let targets = self.sample_peers(&[]);
        if targets.is_empty() {
            debug!(
                msg_type = message.msg_type.as_str(),
                "no peers available, broadcast is a no-op"
            );
            return 0;
        }

        let envelope = match self.seal(&message) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "failed to serialize broadcast message");
                return 0;
            }
        };

        self.fan_out(&targets, envelope).await;
        targets.len()
    }

    /// Unicast send with the same signing as broadcast. The caller decides
    /// whether a failure matters.
    pub async fn send_to(
        &self,
        peer: &NodeInfo,
        mut message: Message,
    ) -> Result<(), crate::gossip::transport::TransportError> {
        if message.from.is_empty() {
            message.from = self.local.node_id.clone();
        }
        let envelope = self.seal(&message).map_err(|e| {
            crate::gossip::transport::TransportError::Unreachable {
                peer: peer.gossip_addr(),
                reason: format!("serialization failed: {e}"),
            }
        })?;
        let result = self.transport.send(peer, envelope).await;
        if result.is_err() {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    // -- inbound -----------------------------------------------------------

    /// Processes one raw inbound body: verify, dedup, refresh membership,
    /// rebroadcast PUTs, dispatch to the registered handler.
    pub async fn handle_incoming(
        self: &Arc<Self>,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), GossipError> {
        if !verify_body(&self.cluster_secret, body, signature.unwrap_or("")) {
            debug!("dropping gossip message with bad signature");
            return Err(GossipError::AuthenticationFailed);
        }

        let message = Message::decode(body)?;
        let key = seen_key(&message);
        if self.seen.contains_key(&key) {
            trace!(
                msg_type = message.msg_type.as_str(),
                message_id = %message.message_id,
                "dropping duplicate gossip message"
            );
            return Ok(());
        }
        self.note_seen(key);
        self.touch_peer(&message);

        // Forward writes onward so they reach nodes the originator never
        // contacted. The echo back to us is caught by the seen-cache.
        if message.msg_type == MessageType::Put {
            if let Some(forward) = message.clone().decrement_hops() {
                let protocol = Arc::clone(self);
                let exclude = message.from.clone();
                tokio::spawn(async move {
                    protocol.rebroadcast(forward, &exclude).await;
                });
            }
        }

        let handler = self.handler.read().clone();
        if let Some(handler) = handler.and_then(|weak| weak.upgrade()) {
            handler.on_message(message).await?;
        }
        Ok(())
    }

    /// Routes membership message types. Called back by the coordinator's
    /// handler for everything that is not PUT/ACK.
    pub async fn handle_membership(&self, message: &Message) -> Result<(), GossipError> {
        match message.msg_type {
            MessageType::Hello | MessageType::Heartbeat => {
                // touch_peer already refreshed the sender.
                trace!(from = %message.from, msg_type = message.msg_type.as_str(), "membership ping");
            }
            MessageType::PeerList | MessageType::BootstrapResponse => {
                let peers = message.peers_from_data()?;
                let added = peers.into_iter().filter(|p| self.add_peer(p.clone())).count();
                if added > 0 {
                    debug!(from = %message.from, added, "merged peer list");
                }
            }
            MessageType::BootstrapRequest => {
                let Some(requester) = message.node_info.clone() else {
                    debug!(from = %message.from, "bootstrap request without node_info, ignored");
                    return Ok(());
                };
                let peers = self.handle_bootstrap(requester.clone());
                let response = Message::bootstrap_response(
                    self.local.node_id.clone(),
                    message.from.clone(),
                    &peers,
                );
                if let Err(e) = self.send_to(&requester, response).await {
                    warn!(peer = %requester.node_id, error = %e, "bootstrap response failed");
                }
            }
            MessageType::Put | MessageType::Ack => {
                // Data-plane types never reach the membership router.
                debug!(msg_type = message.msg_type.as_str(), "unexpected data message in membership path");
            }
        }
        Ok(())
    }

    /// Admits `requester` to the peer table and returns the peer list for a
    /// bootstrap response: every known peer plus this node, minus the
    /// requester itself.
    pub fn handle_bootstrap(&self, requester: NodeInfo) -> Vec<NodeInfo> {
        let requester_id = requester.node_id.clone();
        self.add_peer(requester);

        let peers = self.peers.read();
        let mut list: Vec<NodeInfo> = peers
            .values()
            .filter(|p| p.info.node_id != requester_id)
            .map(|p| p.info.clone())
            .collect();
        list.push(self.local.clone());
        list
    }

    // -- peer table --------------------------------------------------------

    /// Inserts or refreshes a peer. Returns `true` when the peer was new.
    /// The local node is never added to its own table.
    pub fn add_peer(&self, info: NodeInfo) -> bool {
        if info.node_id == self.local.node_id {
            return false;
        }
        let mut peers = self.peers.write();
        let is_new = !peers.contains_key(&info.node_id);
        peers.insert(
            info.node_id.clone(),
            Peer {
                info,
                last_seen: Instant::now(),
                state: PeerState::Alive,
            },
        );
        is_new
    }

    /// Removes a peer outright.
    pub fn remove_peer(&self, node_id: &str) {
        self.peers.write().remove(node_id);
    }

    /// Descriptor lookup, for ACK routing.
    pub fn get_peer(&self, node_id: &str) -> Option<NodeInfo> {
        self.peers.read().get(node_id).map(|p| p.info.clone())
    }

    /// Snapshot of the peer table.
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.read().values().cloned().collect()
    }

    /// Number of known peers.
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Number of entries in the loop-suppression cache.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Total transport sends that failed since startup. Failures are never
    /// surfaced to data-API callers; this is their only visibility.
    pub fn send_failure_count(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    // -- internals ---------------------------------------------------------

    fn seal(&self, message: &Message) -> Result<Envelope, serde_json::Error> {
        let body = message.encode()?;
        let signature = sign_body(&self.cluster_secret, &body);
        Ok(Envelope::new(body, signature))
    }

    /// Random sample of up to `fanout` non-dead peers, excluding `exclude`.
    fn sample_peers(&self, exclude: &[&str]) -> Vec<NodeInfo> {
        let peers = self.peers.read();
        peers
            .values()
            .filter(|p| p.state != PeerState::Dead)
            .filter(|p| !exclude.contains(&p.info.node_id.as_str()))
            .map(|p| p.info.clone())
            .choose_multiple(&mut rand::thread_rng(), self.fanout)
    }

    async fn fan_out(&self, targets: &[NodeInfo], envelope: Envelope) {
        let sends = targets.iter().map(|peer| {
            let envelope = envelope.clone();
            async move {
                if let Err(e) = self.transport.send(peer, envelope).await {
                    self.send_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %peer.node_id, error = %e, "gossip send failed");
                }
            }
        });
        futures::future::join_all(sends).await;
    }

    async fn rebroadcast(&self, message: Message, exclude: &str) {
        let targets = self.sample_peers(&[exclude]);
        if targets.is_empty() {
            return;
        }
        match self.seal(&message) {
            Ok(envelope) => {
                trace!(
                    message_id = %message.message_id,
                    hops = message.hops,
                    targets = targets.len(),
                    "rebroadcasting"
                );
                self.fan_out(&targets, envelope).await;
            }
            Err(e) => warn!(error = %e, "failed to serialize rebroadcast"),
        }
    }

    async fn send_heartbeats(&self) {
        let targets = self.sample_peers(&[]);
        if targets.is_empty() {
            return;
        }
        let message = Message::heartbeat(self.local.node_id.clone(), self.local.clone());
        match self.seal(&message) {
            Ok(envelope) => self.fan_out(&targets, envelope).await,
            Err(e) => warn!(error = %e, "failed to serialize heartbeat"),
        }
    }

    /// Marks silent peers suspect, removes dead ones.
    fn sweep_liveness(&self) {
        let now = Instant::now();
        let suspect_after = self.heartbeat_interval * SUSPECT_AFTER_PERIODS;
        let dead_after = self.heartbeat_interval * DEAD_AFTER_PERIODS;

        let mut peers = self.peers.write();
        peers.retain(|node_id, peer| {
            let silence = now.saturating_duration_since(peer.last_seen);
            if silence >= dead_after {
                info!(peer = %node_id, silence_secs = silence.as_secs(), "peer dead, removed");
                return false;
            }
            if silence >= suspect_after && peer.state == PeerState::Alive {
                debug!(peer = %node_id, silence_secs = silence.as_secs(), "peer suspect");
                peer.state = PeerState::Suspect;
            }
            true
        });
    }

    /// Refreshes the sender's liveness and merges any attached descriptor.
    fn touch_peer(&self, message: &Message) {
        if let Some(info) = &message.node_info {
            if info.node_id != self.local.node_id {
                self.add_peer(info.clone());
            }
        }
        let mut peers = self.peers.write();
        if let Some(peer) = peers.get_mut(&message.from) {
            peer.last_seen = Instant::now();
            peer.state = PeerState::Alive;
        }
    }

    fn note_seen(&self, key: String) {
        self.seen.insert(key, Instant::now());
        self.maybe_evict_seen();
    }

    /// Trims the seen-cache to 75% capacity, oldest entries first.
    fn maybe_evict_seen(&self) {
        if self.seen.len() <= self.seen_capacity {
            return;
        }
        let target = self.seen_capacity * 3 / 4;
        let mut entries: Vec<(String, Instant)> = self
            .seen
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by_key(|(_, at)| *at);

        let to_remove = entries.len().saturating_sub(target);
        for (key, _) in entries.into_iter().take(to_remove) {
            self.seen.remove(&key);
        }
    }
}

/// Scopes a message id by type and sender. ACKs reuse their PUT's id, and
/// distinct replicas' ACKs must not suppress each other.
fn seen_key(message: &Message) -> String {
    format!(
        "{}:{}:{}",
        message.msg_type.as_str(),
        message.from,
        message.message_id
    )
}

/// Parses `host:port` into a sendable descriptor. Bootstrap targets have no
/// known node id yet; the placeholder is replaced once the real descriptor
/// arrives in the response peer list.
fn parse_gossip_addr(addr: &str) -> Option<NodeInfo> {
    let (host, port) = addr.rsplit_once(':')?;
    let gossip_port: u16 = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some(NodeInfo {
        node_id: format!("bootstrap@{addr}"),
        host: host.to_string(),
        gossip_port,
        http_port: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::transport::LoopbackNetwork;
    use std::sync::atomic::AtomicUsize;

    fn node(id: &str, port: u16) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            host: "127.0.0.1".to_string(),
            gossip_port: port,
            http_port: port + 1000,
        }
    }

    fn protocol_for(
        net: &LoopbackNetwork,
        info: NodeInfo,
        secret: &str,
    ) -> Arc<GossipProtocol> {
        let mut config = NodeConfig::for_node(info.node_id.clone());
        config.cluster_secret = secret.to_string();
        Arc::new(GossipProtocol::new(
            info,
            &config,
            Arc::new(net.transport()),
        ))
    }

    struct CountingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn on_message(&self, _message: Message) -> Result<(), GossipError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_messages_reach_handler_once() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "");
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        protocol.set_handler(Arc::downgrade(&handler) as Weak<dyn MessageHandler>);

        let body = Message::put("origin", "k", b"v".to_vec(), 60, "k-1")
            .encode()
            .unwrap();
        protocol.handle_incoming(&body, None).await.unwrap();
        protocol.handle_incoming(&body, None).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acks_from_distinct_replicas_both_pass() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "");
        let handler = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
        });
        protocol.set_handler(Arc::downgrade(&handler) as Weak<dyn MessageHandler>);

        let ack_b = Message::ack("n2", "n1", "k", "k-1").encode().unwrap();
        let ack_c = Message::ack("n3", "n1", "k", "k-1").encode().unwrap();
        protocol.handle_incoming(&ack_b, None).await.unwrap();
        protocol.handle_incoming(&ack_c, None).await.unwrap();
        // Replay of n2's ack is suppressed.
        protocol.handle_incoming(&ack_b, None).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn put_is_rebroadcast_with_decremented_hops_excluding_sender() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "");

        let origin = node("origin", 9700);
        let peer_b = node("b", 9760);
        let peer_c = node("c", 9770);
        let mut origin_inbox = net.register(&origin.gossip_addr());
        let mut inbox_b = net.register(&peer_b.gossip_addr());
        let mut inbox_c = net.register(&peer_c.gossip_addr());
        protocol.add_peer(origin.clone());
        protocol.add_peer(peer_b);
        protocol.add_peer(peer_c);

        let body = Message::put("origin", "k", b"v".to_vec(), 60, "k-1")
            .encode()
            .unwrap();
        protocol.handle_incoming(&body, None).await.unwrap();

        // Both non-sender peers receive the forward; hops went down by one.
        for inbox in [&mut inbox_b, &mut inbox_c] {
            let envelope = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
                .await
                .expect("rebroadcast should arrive")
                .unwrap();
            let forwarded = Message::decode(&envelope.body).unwrap();
            assert_eq!(forwarded.message_id, "k-1");
            assert_eq!(forwarded.hops, crate::config::MAX_REBROADCAST_HOPS - 1);
            assert_eq!(forwarded.from, "origin");
        }
        assert!(origin_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn spent_hop_budget_stops_rebroadcast() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "");
        let peer_b = node("b", 9760);
        let mut inbox_b = net.register(&peer_b.gossip_addr());
        protocol.add_peer(peer_b);

        let mut message = Message::put("origin", "k", b"v".to_vec(), 60, "k-1");
        message.hops = 1;
        let body = message.encode().unwrap();
        protocol.handle_incoming(&body, None).await.unwrap();

        tokio::task::yield_now().await;
        assert!(inbox_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "secret-a");

        let body = Message::put("origin", "k", b"v".to_vec(), 60, "k-1")
            .encode()
            .unwrap();
        let err = protocol
            .handle_incoming(&body, Some("bogus"))
            .await
            .unwrap_err();
        assert!(matches!(err, GossipError::AuthenticationFailed));

        let sig = sign_body("secret-a", &body).unwrap();
        protocol.handle_incoming(&body, Some(&sig)).await.unwrap();
    }

    #[tokio::test]
    async fn bootstrap_request_yields_peer_list_and_admits_joiner() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "");
        let existing = node("n2", 9760);
        protocol.add_peer(existing.clone());

        let joiner = node("joiner", 9780);
        let mut joiner_inbox = net.register(&joiner.gossip_addr());

        let body = Message::bootstrap_request("joiner", joiner.clone())
            .encode()
            .unwrap();
        protocol.handle_incoming(&body, None).await.unwrap();
        protocol
            .handle_membership(&Message::decode(&body).unwrap())
            .await
            .unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(1), joiner_inbox.recv())
            .await
            .expect("bootstrap response should arrive")
            .unwrap();
        let response = Message::decode(&envelope.body).unwrap();
        assert_eq!(response.msg_type, MessageType::BootstrapResponse);

        let mut ids: Vec<String> = response
            .peers_from_data()
            .unwrap()
            .into_iter()
            .map(|p| p.node_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert!(protocol.get_peer("joiner").is_some());
    }

    #[tokio::test]
    async fn liveness_sweep_marks_suspect_then_removes_dead() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "");
        protocol.add_peer(node("n2", 9760));

        let suspect_silence = protocol.heartbeat_interval * SUSPECT_AFTER_PERIODS;
        let dead_silence = protocol.heartbeat_interval * DEAD_AFTER_PERIODS;

        {
            let mut peers = protocol.peers.write();
            let peer = peers.get_mut("n2").unwrap();
            peer.last_seen = Instant::now() - suspect_silence;
        }
        protocol.sweep_liveness();
        assert_eq!(protocol.peers()[0].state, PeerState::Suspect);

        {
            let mut peers = protocol.peers.write();
            let peer = peers.get_mut("n2").unwrap();
            peer.last_seen = Instant::now() - dead_silence;
        }
        protocol.sweep_liveness();
        assert_eq!(protocol.peer_count(), 0);
    }

    #[tokio::test]
    async fn incoming_message_refreshes_sender_liveness() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "");
        protocol.add_peer(node("n2", 9760));
        {
            let mut peers = protocol.peers.write();
            let peer = peers.get_mut("n2").unwrap();
            peer.state = PeerState::Suspect;
            peer.last_seen = Instant::now() - Duration::from_secs(60);
        }

        let body = Message::ack("n2", "n1", "k", "k-9").encode().unwrap();
        protocol.handle_incoming(&body, None).await.unwrap();

        let peer = &protocol.peers()[0];
        assert_eq!(peer.state, PeerState::Alive);
        assert!(peer.last_seen.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn seen_cache_evicts_oldest_past_capacity() {
        let net = LoopbackNetwork::new();
        let protocol = protocol_for(&net, node("n1", 9750), "");
        // Shrink the cache for the test via direct field access.
        let protocol = Arc::try_unwrap(protocol).ok().unwrap();
        let protocol = GossipProtocol {
            seen_capacity: 8,
            ..protocol
        };

        for i in 0..20 {
            protocol.note_seen(format!("PUT:origin:k-{i}"));
        }
        assert!(protocol.seen_count() <= 8);
    }

    #[test]
    fn malformed_bootstrap_addresses_are_rejected() {
        assert!(parse_gossip_addr("10.0.0.1:9750").is_some());
        assert!(parse_gossip_addr("no-port").is_none());
        assert!(parse_gossip_addr(":9750").is_none());
        assert!(parse_gossip_addr("host:notaport").is_none());
    }
}
