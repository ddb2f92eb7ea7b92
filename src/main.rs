// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use nfs41_server_rs::{
    cfg::{
        cli::{config_path_from_env, resolve_config_path},
        config::Config,
        logger::init_logger,
    },
    handlers::fs::InMemoryRoot,
    metrics::AtomicMetrics,
    server::{connection::ServerConnection, dispatch::Dispatcher},
    state::manager::StateManager,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = config_path_from_env();
    let _logger_guard = init_logger(&config_path)?;

    let cfg = resolve_config_path(&config_path)
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let metrics = Arc::new(AtomicMetrics::new());
    let state = StateManager::new(cfg.clone(), metrics);
    let dispatcher = Dispatcher::new(Arc::clone(&state), Arc::new(InMemoryRoot));

    let reaper = state.spawn_reaper();

    let listener = TcpListener::bind(&cfg.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.listen))?;
    info!(listen = %cfg.server.listen, "nfs41 session server listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested, draining");
                break;
            },
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    },
                };
                info!(%peer, "connection accepted");
                let conn = match ServerConnection::from_tcp(
                    stream,
                    state.cancel_token().child_token(),
                    cfg.io_timeout(),
                ) {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(%peer, "connection setup failed: {e}");
                        continue;
                    },
                };
                tokio::spawn(conn.serve(Arc::clone(&dispatcher)));
            },
        }
    }

    state.drain();
    let _ = reaper.await;
    Ok(())
}
