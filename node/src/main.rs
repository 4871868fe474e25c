// Copyright (c) 2026 REPRAM Contributors. MIT License.
// See LICENSE for details.

//! # REPRAM Node
//!
//! Entry point for the `repram-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires the cluster core together, and
//! serves three listeners: the data API, the gossip ingress, and the
//! Prometheus metrics endpoint.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the node
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use repram_core::config::SWEEP_INTERVAL;
use repram_core::{Cluster, GossipProtocol, HttpTransport, NodeInfo, Store};

use cli::{Commands, RepramNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Cadence for refreshing store/peer gauges from component stats.
const GAUGE_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RepramNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — Full node startup sequence
// ---------------------------------------------------------------------------

/// Starts the full node: store with sweeper, gossip protocol with
/// heartbeats, cluster coordinator, and all three HTTP listeners.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    // --- 1. Logging ---
    let log_filter = format!(
        "repram_node={level},repram_core={level},tower_http=warn",
        level = args.log_level
    );
    logging::init_logging(&log_filter, LogFormat::from_str_lossy(&args.log_format));

    // --- 2. Configuration ---
    let config = args.to_config();
    config.validate().context("invalid configuration")?;

    tracing::info!(
        node_id = %config.node_id,
        gossip_addr = %config.gossip_addr(),
        http_port = config.http_port,
        metrics_port = args.metrics_port,
        replication_factor = config.replication_factor,
        quorum = config.quorum(),
        signed = !config.cluster_secret.is_empty(),
        bootstrap_peers = config.bootstrap_peers.len(),
        "starting repram-node"
    );

    // --- 3. Cluster core ---
    let local = NodeInfo {
        node_id: config.node_id.clone(),
        host: config.address.clone(),
        gossip_port: config.gossip_port,
        http_port: config.http_port,
    };
    let store = Arc::new(Store::new(config.max_store_bytes));
    store.start_sweeper(SWEEP_INTERVAL);

    let protocol = Arc::new(GossipProtocol::new(
        local,
        &config,
        Arc::new(HttpTransport::new()),
    ));
    let cluster = Cluster::new(config.clone(), Arc::clone(&store), Arc::clone(&protocol));
    protocol.start(&config.bootstrap_peers).await;

    // --- 4. Metrics + gauge refresher ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let gauge_handle = {
        let metrics = Arc::clone(&node_metrics);
        let store = Arc::clone(&store);
        let protocol = Arc::clone(&protocol);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GAUGE_REFRESH_INTERVAL);
            loop {
                ticker.tick().await;
                let stats = store.stats();
                metrics.store_entries.set(stats.entries as i64);
                metrics.store_bytes.set(stats.bytes as i64);
                metrics.connected_peers.set(protocol.peer_count() as i64);
                metrics
                    .gossip_send_failures
                    .set(protocol.send_failure_count() as i64);
            }
        })
    };

    // --- 5. Listeners ---
    let state = api::AppState {
        cluster: Arc::clone(&cluster),
        metrics: Arc::clone(&node_metrics),
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: chrono::Utc::now(),
    };

    let data_addr = format!("0.0.0.0:{}", config.http_port);
    let data_listener = tokio::net::TcpListener::bind(&data_addr)
        .await
        .with_context(|| format!("failed to bind data listener on {data_addr}"))?;
    tracing::info!("data API listening on {}", data_addr);

    let gossip_addr = format!("0.0.0.0:{}", config.gossip_port);
    let gossip_listener = tokio::net::TcpListener::bind(&gossip_addr)
        .await
        .with_context(|| format!("failed to bind gossip listener on {gossip_addr}"))?;
    tracing::info!("gossip listening on {}", gossip_addr);

    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {metrics_addr}"))?;
    tracing::info!("metrics listening on {}", metrics_addr);

    // --- 6. Banner ---
    print_startup_banner(&config.node_id, &data_addr, &gossip_addr, &config);

    // --- 7. Serve until shutdown ---
    let data_router = api::create_data_router(state.clone());
    let gossip_router = api::create_gossip_router(state);

    tokio::select! {
        res = axum::serve(data_listener, data_router) => {
            if let Err(e) = res {
                tracing::error!("data API server error: {}", e);
            }
        }
        res = axum::serve(gossip_listener, gossip_router) => {
            if let Err(e) = res {
                tracing::error!("gossip server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining");
        }
    }

    // --- 8. Graceful shutdown ---
    cluster.stop();
    gauge_handle.abort();

    tracing::info!("repram-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// status — Query a running node
// ---------------------------------------------------------------------------

/// Queries a running node's status endpoint and prints a summary.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.url.trim_end_matches('/'));
    let body = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to reach {url}"))?
        .text()
        .await
        .context("failed to read status response")?;

    // Pretty-print known fields; fall back to the raw body.
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => {
            println!("Node Status");
            if let Some(node_id) = json.get("node_id").and_then(|v| v.as_str()) {
                println!("  Node ID     : {}", node_id);
            }
            if let Some(version) = json.get("version").and_then(|v| v.as_str()) {
                println!("  Version     : {}", version);
            }
            if let Some(uptime) = json.get("uptime_seconds").and_then(|v| v.as_i64()) {
                println!("  Uptime      : {}s", uptime);
            }
            if let Some(quorum) = json.get("quorum").and_then(|v| v.as_u64()) {
                println!("  Quorum      : {}", quorum);
            }
            if let Some(peers) = json.get("peers").and_then(|v| v.as_array()) {
                println!("  Peers       : {}", peers.len());
            }
            if let Some(store) = json.get("store") {
                if let (Some(entries), Some(bytes)) = (
                    store.get("entries").and_then(|v| v.as_u64()),
                    store.get("bytes").and_then(|v| v.as_u64()),
                ) {
                    println!("  Store       : {} entries, {} bytes", entries, bytes);
                }
            }
        }
        Err(_) => println!("{}", body),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

/// Prints version information to stdout.
fn print_version() {
    println!("repram-node {}", env!("CARGO_PKG_VERSION"));
    if let Some(commit) = option_env!("GIT_COMMIT") {
        println!("commit      {}", commit);
    }
    if let Some(ts) = option_env!("BUILD_TIMESTAMP") {
        println!("built       {}", ts);
    }
}

// ---------------------------------------------------------------------------
// Startup banner
// ---------------------------------------------------------------------------

/// Prints the node startup banner with configuration summary.
fn print_startup_banner(
    node_id: &str,
    data_addr: &str,
    gossip_addr: &str,
    config: &repram_core::NodeConfig,
) {
    let lines = [
        format!("  Node ID:     {}", node_id),
        format!("  Data API:    http://{}", data_addr),
        format!("  Gossip:      http://{}", gossip_addr),
        format!(
            "  Replication: RF={} (quorum {})",
            config.replication_factor,
            config.quorum()
        ),
        format!(
            "  TTL bounds:  {}s..{}s (default {}s)",
            config.min_ttl.as_secs(),
            config.max_ttl.as_secs(),
            config.default_ttl.as_secs()
        ),
        format!(
            "  Auth:        {}",
            if config.cluster_secret.is_empty() {
                "open (unsigned gossip)"
            } else {
                "HMAC-SHA256"
            }
        ),
    ];

    let title = format!("  REPRAM Node v{}", env!("CARGO_PKG_VERSION"));

    let max_width = lines
        .iter()
        .map(|l| l.len())
        .chain(std::iter::once(title.len()))
        .max()
        .unwrap_or(50)
        + 4;

    let border = "\u{2550}".repeat(max_width);

    println!();
    println!("\u{2554}{}\u{2557}", border);
    println!("\u{2551}  {:<width$}  \u{2551}", title.trim(), width = max_width - 4);
    println!("\u{2560}{}\u{2563}", border);
    for line in &lines {
        println!("\u{2551}  {:<width$}  \u{2551}", line.trim(), width = max_width - 4);
    }
    println!("\u{255A}{}\u{255D}", border);
    println!();
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
