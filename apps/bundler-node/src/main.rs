mod cli;
mod config;
mod db;
mod dto;
mod http;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use bundler_mempool::{EntryPointRegistry, MempoolStore};
use bundler_reputation::BytecodeStore;
use bundler_rpc_client::JsonRpcEthereumClient;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = config::load_config()?;
    let args = cli::Cli::parse();
    let command = args.command.unwrap_or_default();

    tracing::info!("bundler-node starting");
    tracing::info!(
        rpc_endpoint = %cfg.rpc_endpoint_uri,
        environment = ?cfg.environment,
        bind_addr = %cfg.bind_addr,
        seed_entry_points = cfg.seed_entry_points.len(),
        "config loaded"
    );

    let pool = db::connect(&cfg.db_url, cfg.db_max_connections).await?;
    db::migrate(&pool).await.context("apply bundler-node migrations")?;

    if matches!(command, Command::InitializeDb) {
        tracing::info!("database initialized");
        return Ok(());
    }

    let rpc = JsonRpcEthereumClient::new(vec![cfg.rpc_endpoint_uri.clone()])?;
    let entry_points = EntryPointRegistry::new(pool.clone());
    for address in &cfg.seed_entry_points {
        entry_points.add(*address).await.context("seed supported entry point")?;
    }
    let reputation = BytecodeStore::new(pool.clone());
    let mempool = MempoolStore::new(pool.clone());

    match command {
        Command::InitializeDb => unreachable!("handled above"),
        Command::UpdateBytecodeFromAddress { address, is_trusted } => {
            let hash = bundler_pipeline::admin::update_bytecode_from_address(&reputation, &rpc, address, is_trusted).await?;
            tracing::info!(%address, is_trusted, bytecode_hash = %hash, "bytecode reputation updated");
            Ok(())
        }
        Command::UpdateEntryPoint { address, is_supported } => {
            bundler_pipeline::admin::update_entry_point(&entry_points, address, is_supported).await?;
            tracing::info!(%address, is_supported, "entry point registry updated");
            Ok(())
        }
        Command::Runserver => {
            // Per spec: the `last_seen_block` cursor is process-wide, non-persistent
            // state, seeded from `eth_blockNumber` on startup. A lost cursor only
            // delays receipt detection, never corrupts it, so a failure here is
            // logged and tolerated rather than treated as fatal.
            if let Err(e) = rpc.seed_from_chain_tip().await {
                tracing::warn!(error = %e, "failed to seed last_seen_block from chain tip; starting from 0");
            }

            let settings = state::settings_from_config(&cfg);
            let app_state: state::SharedState = Arc::new(state::AppState {
                rpc,
                mempool,
                reputation,
                entry_points,
                settings,
                last_user_ops_count: cfg.last_user_ops_count,
            });

            let router = http::router(app_state);
            let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await.context("bind bundler-node HTTP listener")?;
            tracing::info!(bind_addr = %cfg.bind_addr, "bundler-node started");

            let shutdown = CancellationToken::new();
            let mut join_set: tokio::task::JoinSet<Result<()>> = tokio::task::JoinSet::new();
            {
                let shutdown = shutdown.clone();
                join_set.spawn(async move {
                    axum::serve(listener, router)
                        .with_graceful_shutdown(async move { shutdown.cancelled().await })
                        .await
                        .context("bundler-node HTTP server failed")
                });
            }

            let mut fatal: Option<anyhow::Error> = None;
            tokio::select! {
                res = shutdown_signal() => {
                    res?;
                    tracing::info!("shutdown requested");
                },
                res = join_set.join_next() => {
                    if let Some(res) = res {
                        let res = res.context("bundler-node HTTP task panicked")?;
                        if let Err(e) = res {
                            fatal = Some(e.context("bundler-node HTTP task failed"));
                        }
                    }
                }
            }

            shutdown.cancel();
            while let Some(res) = join_set.join_next().await {
                let res = res.context("bundler-node HTTP task panicked")?;
                if let Err(e) = res {
                    fatal.get_or_insert_with(|| e.context("bundler-node HTTP task failed"));
                }
            }
            fatal.map_or(Ok(()), Err)
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}
