//! # HTTP API
//!
//! Thin axum adapter over the cluster core. Two routers: the data router
//! serves clients on the HTTP port, the gossip router serves peers on the
//! gossip port. All handlers share state through axum's `State` extractor.
//!
//! ## Data router
//!
//! | Method | Path              | Description                              |
//! |--------|-------------------|------------------------------------------|
//! | PUT    | `/v1/data/{key}`  | Store bytes; TTL from the `X-TTL` header |
//! | GET    | `/v1/data/{key}`  | Read bytes plus TTL headers              |
//! | GET    | `/v1/scan`        | Live keys, optional prefix filter        |
//! | GET    | `/health`         | Liveness probe                           |
//! | GET    | `/status`         | Node status summary                      |
//!
//! ## Gossip router
//!
//! | Method | Path                 | Description                         |
//! |--------|----------------------|-------------------------------------|
//! | POST   | `/gossip/message`    | Inbound gossip body, HMAC-verified  |
//! | POST   | `/gossip/bootstrap`  | Peer-list exchange for joining nodes|
//! | GET    | `/health`            | Liveness probe for peers            |

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use repram_core::{Cluster, ClusterError, GossipError, NodeInfo, StoreStats, GOSSIP_SIG_HEADER};

use crate::metrics::SharedMetrics;

/// Request header carrying the entry TTL in seconds.
pub const TTL_HEADER: &str = "x-ttl";
/// Response header: RFC 3339 write time on the answering replica.
pub const CREATED_AT_HEADER: &str = "x-created-at";
/// Response header: the clamped TTL the entry was stored with, in seconds.
pub const ORIGINAL_TTL_HEADER: &str = "x-original-ttl";
/// Response header: seconds left until the entry expires.
pub const REMAINING_TTL_HEADER: &str = "x-remaining-ttl";

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone — everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The cluster coordinator serving all data operations.
    pub cluster: Arc<Cluster>,
    /// Prometheus metric handles for in-handler recording.
    pub metrics: SharedMetrics,
    /// The node's reported version string.
    pub version: String,
    /// Process start time, for uptime reporting.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the client-facing data router with CORS and request tracing.
pub fn create_data_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::PUT, Method::HEAD, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/v1/data/{key}", put(put_data_handler).get(get_data_handler))
        .route("/v1/scan", get(scan_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds the peer-facing gossip router.
pub fn create_gossip_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/gossip/message", post(gossip_message_handler))
        .route("/gossip/bootstrap", post(gossip_bootstrap_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// This node's identifier.
    pub node_id: String,
    /// Node software version.
    pub version: String,
    /// Seconds since process start.
    pub uptime_seconds: i64,
    /// Configured replication factor.
    pub replication_factor: usize,
    /// Derived write quorum.
    pub quorum: usize,
    /// Known peers and their liveness.
    pub peers: Vec<PeerStatus>,
    /// Store entry/byte counts.
    pub store: StoreStats,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// One peer row in the status response.
#[derive(Debug, Serialize)]
pub struct PeerStatus {
    /// Peer node id.
    pub node_id: String,
    /// Peer gossip address.
    pub gossip_addr: String,
    /// Local liveness judgment.
    pub state: repram_core::PeerState,
}

/// Response payload for `GET /v1/scan`.
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    /// Live keys matching the filter.
    pub keys: Vec<String>,
    /// Per-key remaining TTLs, present only with `?verbose=true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<ScanEntry>>,
}

/// One verbose scan row.
#[derive(Debug, Serialize)]
pub struct ScanEntry {
    /// The key.
    pub key: String,
    /// Seconds until this entry expires.
    pub remaining_ttl_seconds: u64,
}

/// Query parameters for `GET /v1/scan`.
#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    /// Only return keys starting with this prefix.
    pub prefix: Option<String>,
    /// Include remaining TTLs per key.
    pub verbose: Option<bool>,
}

/// Request payload for `POST /gossip/bootstrap`.
#[derive(Debug, Deserialize)]
pub struct BootstrapRequest {
    /// The joining node's descriptor.
    pub node_info: NodeInfo,
}

/// Response payload for `POST /gossip/bootstrap`.
#[derive(Debug, Serialize)]
pub struct BootstrapResponse {
    /// Known peers, including the answering node.
    pub peers: Vec<NodeInfo>,
}

// ---------------------------------------------------------------------------
// Data Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — returns 200 if the node is alive.
///
/// Intentionally does not check subsystem health; that belongs in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status` — node status summary.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let peers = state
        .cluster
        .protocol()
        .peers()
        .into_iter()
        .map(|peer| PeerStatus {
            node_id: peer.info.node_id.clone(),
            gossip_addr: peer.info.gossip_addr(),
            state: peer.state,
        })
        .collect();

    Json(StatusResponse {
        node_id: state.cluster.protocol().local().node_id.clone(),
        version: state.version.clone(),
        uptime_seconds: (chrono::Utc::now() - state.started_at).num_seconds(),
        replication_factor: state.cluster.config().replication_factor,
        quorum: state.cluster.quorum(),
        peers,
        store: state.cluster.stats(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `PUT /v1/data/{key}` — replicated write.
///
/// The body is the raw value; the `X-TTL` header carries the TTL in seconds
/// and is optional (the configured default applies). Returns 201 on quorum,
/// 507 when the store is full, 503 when quorum was not reached in time.
async fn put_data_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ttl = match parse_ttl(&headers) {
        Ok(ttl) => ttl,
        Err(reason) => {
            state.metrics.put_failures_total.inc();
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": reason })),
            )
                .into_response();
        }
    };

    let timer = state.metrics.put_duration_seconds.start_timer();
    let result = state.cluster.put(&key, &body, ttl).await;
    timer.observe_duration();

    match result {
        Ok(()) => {
            state.metrics.puts_total.inc();
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "status": "ok", "key": key })),
            )
                .into_response()
        }
        Err(e) => {
            state.metrics.put_failures_total.inc();
            let status = match &e {
                ClusterError::CapacityExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
                ClusterError::InsufficientReplicas { .. } => StatusCode::SERVICE_UNAVAILABLE,
                // Client-closed-request class; the node is going away.
                ClusterError::Cancelled => {
                    StatusCode::from_u16(499).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
                }
            };
            (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// `GET /v1/data/{key}` — local read with TTL headers. axum serves HEAD from
/// the same handler with the body stripped.
async fn get_data_handler(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    state.metrics.gets_total.inc();
    match state.cluster.get_with_metadata(&key) {
        Some((data, metadata)) => {
            let created: chrono::DateTime<chrono::Utc> = metadata.created_at.into();
            (
                [
                    (CREATED_AT_HEADER, created.to_rfc3339()),
                    (
                        ORIGINAL_TTL_HEADER,
                        metadata.original_ttl.as_secs().to_string(),
                    ),
                    (
                        REMAINING_TTL_HEADER,
                        metadata.remaining_ttl.as_secs().to_string(),
                    ),
                ],
                data,
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /v1/scan` — live keys, optionally with remaining TTLs.
async fn scan_handler(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
) -> impl IntoResponse {
    let prefix = query.prefix.as_deref();

    if query.verbose.unwrap_or(false) {
        let mut entries = Vec::new();
        state.cluster.store().range(|key, remaining| {
            if prefix.map_or(true, |p| key.starts_with(p)) {
                entries.push(ScanEntry {
                    key: key.to_string(),
                    remaining_ttl_seconds: remaining,
                });
            }
            true
        });
        let keys = entries.iter().map(|e| e.key.clone()).collect();
        Json(ScanResponse {
            keys,
            entries: Some(entries),
        })
    } else {
        Json(ScanResponse {
            keys: state.cluster.scan(prefix),
            entries: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Gossip Handlers
// ---------------------------------------------------------------------------

/// `POST /gossip/message` — inbound gossip. The raw body is verified against
/// the `X-Gossip-Sig` header before anything is decoded; failures increment
/// a metric and are not relayed further.
async fn gossip_message_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.gossip_messages_received_total.inc();
    let signature = headers
        .get(GOSSIP_SIG_HEADER)
        .and_then(|value| value.to_str().ok());

    match state
        .cluster
        .protocol()
        .handle_incoming(&body, signature)
        .await
    {
        Ok(()) => Json(serde_json::json!({ "status": "ok" })).into_response(),
        Err(GossipError::AuthenticationFailed) => {
            state.metrics.gossip_auth_failures_total.inc();
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// `POST /gossip/bootstrap` — admits the caller to the peer table and
/// returns the known peer list.
async fn gossip_bootstrap_handler(
    State(state): State<AppState>,
    Json(request): Json<BootstrapRequest>,
) -> impl IntoResponse {
    let peers = state.cluster.handle_bootstrap(request.node_info);
    Json(BootstrapResponse { peers })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Reads the optional `X-TTL` header. Absent means "use the default";
/// present-but-malformed is a client error.
fn parse_ttl(headers: &HeaderMap) -> Result<Option<Duration>, String> {
    let Some(value) = headers.get(TTL_HEADER) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| format!("{TTL_HEADER} header is not valid ascii"))?;
    let seconds: u64 = text
        .trim()
        .parse()
        .map_err(|_| format!("{TTL_HEADER} header must be an integer number of seconds"))?;
    Ok(Some(Duration::from_secs(seconds)))
}
