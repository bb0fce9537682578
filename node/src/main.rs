// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tally Node
//!
//! Entry point for the `tally-node` binary. Parses CLI arguments, initializes
//! logging and metrics, opens the ledger store, and serves the REST gateway.
//!
//! The binary supports two subcommands:
//!
//! - `run`    : start the gateway
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use tally_engine::config::{DEMO_GRANTS, DEMO_REPLAY, DEMO_SEED_TIMESTAMP, ENGINE_VERSION};
use tally_engine::{MemoryStore, SledStore, Store, Transfer, TransactionProcessor};

use cli::{Commands, RunArgs, TallyNodeCli};
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TallyNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Picks the storage backend and hands over to [`serve`].
async fn run_node(args: RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = ?args.data_dir,
        minting = args.mint_key.is_some(),
        "starting tally-node"
    );

    match &args.data_dir {
        Some(data_dir) => {
            let db_path = data_dir.join("db");
            std::fs::create_dir_all(&db_path).with_context(|| {
                format!("failed to create database directory: {}", db_path.display())
            })?;
            let store = SledStore::open(&db_path)
                .with_context(|| format!("failed to open database at {}", db_path.display()))?;
            tracing::info!(path = %db_path.display(), "database opened");
            serve(args, store).await
        }
        None => {
            tracing::warn!("no --data-dir given, ledger is kept in memory only");
            serve(args, MemoryStore::new()).await
        }
    }
}

/// Runs the gateway and metrics servers until a shutdown signal arrives.
async fn serve<S: Store + 'static>(args: RunArgs, store: S) -> Result<()> {
    let processor = Arc::new(TransactionProcessor::new(store));

    if args.seed_demo && seed_demo(&processor)? && args.replay_demo {
        replay_demo(&processor)?;
    }

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let wallet_count = processor
        .wallet_count()
        .context("failed to count wallets")?;
    node_metrics.wallets.set(wallet_count as i64);

    // --- Application state ---
    let app_state = api::AppState {
        processor: Arc::clone(&processor),
        metrics: Arc::clone(&node_metrics),
        mint_key: args.mint_key.as_deref().map(Arc::from),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    processor
        .store()
        .flush()
        .context("failed to flush ledger store")?;
    tracing::info!("tally-node stopped");
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid demo timestamp {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Mints the demo grants, unless the ledger already has wallets. Returns
/// whether anything was minted.
fn seed_demo<S: Store>(processor: &TransactionProcessor<S>) -> Result<bool> {
    if processor.wallet_count()? > 0 {
        tracing::info!("ledger not empty, skipping demo seed");
        return Ok(false);
    }

    let timestamp = parse_timestamp(DEMO_SEED_TIMESTAMP)?;

    for (wallet_id, points) in DEMO_GRANTS {
        processor
            .mint_points(wallet_id, points, Some(timestamp))
            .with_context(|| format!("failed to seed wallet {wallet_id}"))?;
    }

    tracing::info!(wallets = DEMO_GRANTS.len(), "demo wallets seeded");
    Ok(true)
}

/// Submits the demo transfers in their listed order.
fn replay_demo<S: Store>(processor: &TransactionProcessor<S>) -> Result<()> {
    for (source, recipient, points, timestamp) in DEMO_REPLAY {
        let transfer = Transfer::new(source, recipient, points, parse_timestamp(timestamp)?);
        processor
            .process_transfer(&transfer)
            .with_context(|| format!("failed to replay {points} points from {source}"))?;
    }

    tracing::info!(transfers = DEMO_REPLAY.len(), "demo transfers replayed");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("tally-node {}", env!("CARGO_PKG_VERSION"));
    println!("engine     {}", ENGINE_VERSION);
}

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
