//! # Cluster Coordinator
//!
//! Implements the public data API on top of the store and gossip protocol.
//! A write is a cross-component protocol: store locally, broadcast to peers,
//! wait for enough acknowledgements.
//!
//! ```text
//!           ┌─(store full)─────────────┐
//!           │                          ▼
//! new ──► local-written ──► broadcast-started ──► quorum-reached ──► ok
//!                                │
//!                                ├── timeout ──► InsufficientReplicas
//!                                └── shutdown ─► Cancelled
//! ```
//!
//! Reads never leave the node: any live replica can answer, and staleness is
//! bounded by gossip propagation latency. On a quorum timeout the local copy
//! is retained — replicas may still catch up via rebroadcast, and reads
//! against this node keep working. Eventual consistency with a best-effort
//! write path, not transactional commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::NodeConfig;
use crate::gossip::message::{Message, MessageType, NodeInfo};
use crate::gossip::protocol::{GossipError, GossipProtocol, MessageHandler};
use crate::store::{EntryMetadata, Store, StoreError, StoreStats};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures surfaced to data-API callers. Transport and authentication
/// failures never appear here — they are absorbed below and show up only as
/// missing acknowledgements.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The local store rejected the write for capacity.
    #[error(transparent)]
    CapacityExceeded(#[from] StoreError),
    /// Quorum was not reached within the write timeout. The local copy is
    /// retained.
    #[error("quorum of {quorum} not reached within {timeout:?} ({confirmations} confirmed)")]
    InsufficientReplicas {
        /// Required acknowledgement count, including the local write.
        quorum: usize,
        /// Acknowledgements seen before giving up.
        confirmations: usize,
        /// How long the write waited.
        timeout: Duration,
    },
    /// The coordinator shut down while the write was waiting for quorum.
    #[error("write cancelled: node shutting down")]
    Cancelled,
}

// ---------------------------------------------------------------------------
// Pending writes
// ---------------------------------------------------------------------------

/// In-flight Put state, created on Put entry and destroyed on Put exit.
/// Keyed by `message_id`, never by key — back-to-back writes to the same key
/// must not clash.
struct PendingWrite {
    quorum_target: usize,
    confirmations: usize,
    /// Armed completion signal; taken on first quorum hit so late
    /// acknowledgements cannot double-release.
    done: Option<oneshot::Sender<()>>,
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

/// The coordinator for one node: public Put/Get/Scan plus gossip dispatch.
pub struct Cluster {
    config: NodeConfig,
    quorum: usize,
    store: Arc<Store>,
    protocol: Arc<GossipProtocol>,
    pending: Mutex<HashMap<String, PendingWrite>>,
    clock: Arc<dyn Clock>,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
}

impl Cluster {
    /// Builds the coordinator and wires it into the protocol as the inbound
    /// message handler.
    pub fn new(config: NodeConfig, store: Arc<Store>, protocol: Arc<GossipProtocol>) -> Arc<Self> {
        Self::with_clock(config, store, protocol, Arc::new(SystemClock))
    }

    /// Like [`Cluster::new`] with an injected clock for tests.
    pub fn with_clock(
        config: NodeConfig,
        store: Arc<Store>,
        protocol: Arc<GossipProtocol>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        let quorum = config.quorum();
        let cluster = Arc::new(Self {
            config,
            quorum,
            store,
            protocol,
            pending: Mutex::new(HashMap::new()),
            clock,
            shutdown,
            stopped: AtomicBool::new(false),
        });
        let weak: Weak<Cluster> = Arc::downgrade(&cluster);
        let handler: Weak<dyn MessageHandler> = weak;
        cluster.protocol.set_handler(handler);
        cluster
    }

    /// The acknowledgement count a write waits for.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// The configuration this coordinator was built with.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The underlying store, for stats and adapter-level reads.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The gossip protocol, for membership queries.
    pub fn protocol(&self) -> &Arc<GossipProtocol> {
        &self.protocol
    }

    // -- public data API ---------------------------------------------------

    /// Replicated write. Stores locally, broadcasts to peers, and returns
    /// once `quorum` replicas (counting this one) have acknowledged.
    ///
    /// A `None` TTL uses the configured default; any TTL is clamped into
    /// `[min_ttl, max_ttl]` before storing, and the clamped value is what
    /// replicas store and report as the original TTL.
    pub async fn put(
        &self,
        key: &str,
        data: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), ClusterError> {
        let ttl = self.clamp_ttl(ttl);
        let message_id = self.next_message_id(key);

        // Publish the pending record before anything else so an early
        // acknowledgement can never race past registration.
        let receiver = self.register_pending(&message_id);

        if let Err(e) = self.store.put(key, data, ttl) {
            self.deregister_pending(&message_id);
            return Err(e.into());
        }

        if self.quorum <= 1 {
            // Single-replica deployments succeed on the local write alone.
            self.deregister_pending(&message_id);
            trace!(key, "write complete (quorum 1)");
            return Ok(());
        }

        let message = Message::put(
            self.config.node_id.clone(),
            key,
            data.to_vec(),
            ttl.as_secs(),
            message_id.clone(),
        );
        let contacted = self.protocol.broadcast(message).await;
        debug!(key, message_id = %message_id, contacted, "write broadcast");

        let mut shutdown = self.shutdown.subscribe();
        let timeout = self.config.write_timeout;
        let outcome = tokio::select! {
            result = receiver => match result {
                Ok(()) => Ok(()),
                // The sender only disappears if the record was torn down
                // underneath us, which shutdown is the sole cause of.
                Err(_) => Err(ClusterError::Cancelled),
            },
            _ = tokio::time::sleep(timeout) => {
                let confirmations = self.confirmations(&message_id);
                Err(ClusterError::InsufficientReplicas {
                    quorum: self.quorum,
                    confirmations,
                    timeout,
                })
            }
            _ = shutdown.wait_for(|stopped| *stopped) => Err(ClusterError::Cancelled),
        };

        self.deregister_pending(&message_id);
        if let Err(e) = &outcome {
            warn!(key, message_id = %message_id, error = %e, "write did not reach quorum");
        }
        outcome
    }

    /// Local read. Never forwards — any live replica can answer.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.store.get(key)
    }

    /// Local read with entry lifetime metadata.
    pub fn get_with_metadata(&self, key: &str) -> Option<(Vec<u8>, EntryMetadata)> {
        self.store.get_with_metadata(key)
    }

    /// Local key scan.
    pub fn scan(&self, prefix: Option<&str>) -> Vec<String> {
        self.store.scan(prefix)
    }

    /// Local store statistics.
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Admits a bootstrap requester and returns the peer list for it.
    pub fn handle_bootstrap(&self, requester: NodeInfo) -> Vec<NodeInfo> {
        self.protocol.handle_bootstrap(requester)
    }

    /// Stops the coordinator, the gossip loops, and the store sweeper.
    /// Idempotent; writes waiting for quorum fail with `Cancelled`.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown.send(true);
        self.protocol.stop();
        self.store.close();
        info!(node_id = %self.config.node_id, "cluster coordinator stopped");
    }

    // -- gossip dispatch ---------------------------------------------------

    /// Applies a replicated write and acknowledges it to the originator.
    async fn handle_put(&self, message: &Message) {
        let ttl = self.clamp_ttl(Some(Duration::from_secs(message.ttl)));
        if let Err(e) = self.store.put(&message.key, &message.data, ttl) {
            // No acknowledgement: the originator counts us out.
            warn!(key = %message.key, error = %e, "replicated write rejected");
            return;
        }
        trace!(key = %message.key, from = %message.from, "replicated write applied");

        let Some(originator) = self.protocol.get_peer(&message.from) else {
            // Unknown sender: drop silently, the originator times out and
            // the application layer retries.
            debug!(from = %message.from, "no descriptor for originator, ack dropped");
            return;
        };
        let ack = Message::ack(
            self.config.node_id.clone(),
            message.from.clone(),
            message.key.clone(),
            message.message_id.clone(),
        );
        if let Err(e) = self.protocol.send_to(&originator, ack).await {
            debug!(to = %message.from, error = %e, "ack send failed");
        }
    }

    /// Counts an acknowledgement toward its pending write. Unknown ids are
    /// ignored — retries, reordering, and acks for completed writes all land
    /// here.
    fn handle_ack(&self, message: &Message) {
        let mut pending = self.pending.lock();
        let Some(record) = pending.get_mut(&message.message_id) else {
            trace!(message_id = %message.message_id, from = %message.from, "ack for unknown write ignored");
            return;
        };
        record.confirmations += 1;
        trace!(
            message_id = %message.message_id,
            confirmations = record.confirmations,
            target = record.quorum_target,
            "ack counted"
        );
        if record.confirmations >= record.quorum_target {
            if let Some(done) = record.done.take() {
                let _ = done.send(());
            }
        }
    }

    // -- pending write bookkeeping ----------------------------------------

    fn register_pending(&self, message_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let record = PendingWrite {
            quorum_target: self.quorum,
            // The local write counts as the first confirmation.
            confirmations: 1,
            done: Some(tx),
        };
        self.pending.lock().insert(message_id.to_string(), record);
        rx
    }

    fn deregister_pending(&self, message_id: &str) {
        self.pending.lock().remove(message_id);
    }

    fn confirmations(&self, message_id: &str) -> usize {
        self.pending
            .lock()
            .get(message_id)
            .map(|r| r.confirmations)
            .unwrap_or(0)
    }

    // -- helpers -----------------------------------------------------------

    /// Clamps a requested TTL into the configured bounds; `None` means the
    /// configured default (then clamped).
    pub fn clamp_ttl(&self, ttl: Option<Duration>) -> Duration {
        let requested = ttl.unwrap_or(self.config.default_ttl);
        requested.clamp(self.config.min_ttl, self.config.max_ttl)
    }

    /// `<key>-<nanos>`: unique enough within a node, readable in logs.
    fn next_message_id(&self, key: &str) -> String {
        let nanos = self
            .clock
            .wall_now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        format!("{key}-{nanos}")
    }
}

#[async_trait]
impl MessageHandler for Cluster {
    /// Routes inbound gossip by type: data-plane messages are handled here,
    /// membership types go back to the protocol.
    async fn on_message(&self, message: Message) -> Result<(), GossipError> {
        match message.msg_type {
            MessageType::Put => {
                self.handle_put(&message).await;
                Ok(())
            }
            MessageType::Ack => {
                self.handle_ack(&message);
                Ok(())
            }
            _ => self.protocol.handle_membership(&message).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gossip::transport::LoopbackNetwork;

    fn node(id: &str, port: u16) -> NodeInfo {
        NodeInfo {
            node_id: id.to_string(),
            host: "127.0.0.1".to_string(),
            gossip_port: port,
            http_port: port + 1000,
        }
    }

    fn cluster_with(
        net: &LoopbackNetwork,
        id: &str,
        port: u16,
        replication_factor: usize,
    ) -> Arc<Cluster> {
        let mut config = NodeConfig::for_node(id);
        config.address = "127.0.0.1".to_string();
        config.gossip_port = port;
        config.replication_factor = replication_factor;
        config.write_timeout = Duration::from_millis(200);
        config.min_ttl = Duration::from_secs(1);

        let info = node(id, port);
        let store = Arc::new(Store::new(0));
        let protocol = Arc::new(GossipProtocol::new(
            info,
            &config,
            Arc::new(net.transport()),
        ));
        Cluster::new(config, store, protocol)
    }

    #[tokio::test]
    async fn single_node_put_succeeds_without_peers() {
        let net = LoopbackNetwork::new();
        let cluster = cluster_with(&net, "solo", 9750, 1);

        cluster.put("k", b"hello", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(cluster.get("k").as_deref(), Some(&b"hello"[..]));
        assert!(cluster.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn quorum_timeout_preserves_local_copy() {
        let net = LoopbackNetwork::new();
        // RF=3 means quorum 2; there are no peers, so no acks ever arrive.
        let cluster = cluster_with(&net, "alone", 9750, 3);

        let err = cluster
            .put("k", b"v", Some(Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterError::InsufficientReplicas {
                quorum: 2,
                confirmations: 1,
                ..
            }
        ));
        assert_eq!(cluster.get("k").as_deref(), Some(&b"v"[..]));
        assert!(cluster.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn capacity_failure_skips_broadcast_and_cleans_up() {
        let net = LoopbackNetwork::new();
        let mut config = NodeConfig::for_node("n1");
        config.max_store_bytes = 4;
        config.min_ttl = Duration::from_secs(1);
        let store = Arc::new(Store::new(config.max_store_bytes));
        let protocol = Arc::new(GossipProtocol::new(
            node("n1", 9750),
            &config,
            Arc::new(net.transport()),
        ));
        let cluster = Cluster::new(config, store, protocol);

        let err = cluster
            .put("k", b"too large", Some(Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::CapacityExceeded(_)));
        assert!(cluster.pending.lock().is_empty());
        assert_eq!(cluster.get("k"), None);
    }

    #[tokio::test]
    async fn ttl_clamping() {
        let net = LoopbackNetwork::new();
        let cluster = cluster_with(&net, "n1", 9750, 1);
        // Config in cluster_with: min 1s, defaults otherwise.
        assert_eq!(
            cluster.clamp_ttl(Some(Duration::from_millis(10))),
            Duration::from_secs(1)
        );
        assert_eq!(
            cluster.clamp_ttl(Some(Duration::from_secs(1_000_000))),
            crate::config::DEFAULT_MAX_TTL
        );
        assert_eq!(cluster.clamp_ttl(None), crate::config::DEFAULT_TTL);
    }

    #[tokio::test]
    async fn replicated_put_is_applied_and_acked() {
        let net = LoopbackNetwork::new();
        let cluster = cluster_with(&net, "replica", 9760, 3);

        // The originator is a known peer with a registered inbox.
        let origin = node("origin", 9750);
        let mut origin_inbox = net.register(&origin.gossip_addr());
        cluster.protocol.add_peer(origin.clone());

        let put = Message::put("origin", "k", b"v".to_vec(), 60, "k-77");
        cluster.on_message(put).await.unwrap();

        assert_eq!(cluster.get("k").as_deref(), Some(&b"v"[..]));
        let envelope = tokio::time::timeout(Duration::from_secs(1), origin_inbox.recv())
            .await
            .expect("ack should be sent")
            .unwrap();
        let ack = Message::decode(&envelope.body).unwrap();
        assert_eq!(ack.msg_type, MessageType::Ack);
        assert_eq!(ack.message_id, "k-77");
        assert_eq!(ack.to, "origin");
        assert_eq!(ack.from, "replica");
    }

    #[tokio::test]
    async fn put_from_unknown_originator_is_stored_without_ack() {
        let net = LoopbackNetwork::new();
        let cluster = cluster_with(&net, "replica", 9760, 3);

        let put = Message::put("stranger", "k", b"v".to_vec(), 60, "k-1");
        cluster.on_message(put).await.unwrap();

        // Stored locally; no descriptor, so no ack went anywhere.
        assert_eq!(cluster.get("k").as_deref(), Some(&b"v"[..]));
    }

    #[tokio::test]
    async fn acks_for_unknown_message_id_are_ignored() {
        let net = LoopbackNetwork::new();
        let cluster = cluster_with(&net, "n1", 9750, 3);

        let ack = Message::ack("n2", "n1", "k", "never-registered");
        cluster.on_message(ack).await.unwrap();
        assert!(cluster.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn quorum_completion_is_idempotent_across_extra_acks() {
        let net = LoopbackNetwork::new();
        let cluster = cluster_with(&net, "n1", 9750, 3);

        let rx = cluster.register_pending("k-1");
        let ack = |from: &str| Message::ack(from, "n1", "k", "k-1");

        cluster.handle_ack(&ack("n2"));
        // Quorum of 2 reached (local + n2); further acks must not panic or
        // double-release.
        cluster.handle_ack(&ack("n3"));
        cluster.handle_ack(&ack("n4"));

        rx.await.unwrap();
        assert_eq!(cluster.confirmations("k-1"), 4);
        cluster.deregister_pending("k-1");
    }

    #[tokio::test]
    async fn stop_cancels_waiting_writes() {
        let net = LoopbackNetwork::new();
        let mut config = NodeConfig::for_node("n1");
        config.replication_factor = 3;
        config.write_timeout = Duration::from_secs(30);
        config.min_ttl = Duration::from_secs(1);
        let store = Arc::new(Store::new(0));
        let protocol = Arc::new(GossipProtocol::new(
            node("n1", 9750),
            &config,
            Arc::new(net.transport()),
        ));
        let cluster = Cluster::new(config, store, protocol);

        let writer = Arc::clone(&cluster);
        let handle = tokio::spawn(async move {
            writer.put("k", b"v", Some(Duration::from_secs(60))).await
        });

        // Let the write register and start waiting, then shut down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cluster.stop();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ClusterError::Cancelled)));
        // Local copy survives cancellation, same as a timeout.
        assert_eq!(cluster.get("k").as_deref(), Some(&b"v"[..]));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let net = LoopbackNetwork::new();
        let cluster = cluster_with(&net, "n1", 9750, 1);
        cluster.stop();
        cluster.stop();
    }

    #[test]
    fn message_ids_embed_key_and_are_unique() {
        let net = LoopbackNetwork::new();
        let mut config = NodeConfig::for_node("n1");
        config.replication_factor = 1;
        let store = Arc::new(Store::new(0));
        let protocol = Arc::new(GossipProtocol::new(
            node("n1", 9750),
            &config,
            Arc::new(net.transport()),
        ));
        let cluster = Cluster::new(config, store, protocol);

        let a = cluster.next_message_id("mykey");
        let b = cluster.next_message_id("mykey");
        assert!(a.starts_with("mykey-"));
        assert_ne!(a, b);
    }
}
