// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tiered_vectordb::api::rest::{create_app, ApiConfig, AppState};
use tiered_vectordb::core::index::{IndexConfig, VectorIndex};
use tiered_vectordb::replication::{ReplicationConfig, ReplicationManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiered_vectordb=info,tower_http=debug".into()),
        )
        .init();

    // Load configuration from environment
    let api_config = ApiConfig::from_env();
    let index_config = IndexConfig::from_env().context("invalid index configuration")?;
    let replication_config =
        ReplicationConfig::from_env().context("invalid replication configuration")?;
    let node_id = std::env::var("VECTOR_STORE_NODE_ID").unwrap_or_else(|_| "node-0".to_string());

    info!(
        "Starting node {} on {}:{} (cold tier: {})",
        node_id, api_config.host, api_config.port, index_config.db_path
    );

    let index = Arc::new(VectorIndex::open(index_config).await?);
    let manager = Arc::new(ReplicationManager::new(node_id, replication_config)?);
    manager.start().await;

    let app = create_app(
        &api_config,
        AppState {
            index: index.clone(),
            manager: manager.clone(),
        },
    );

    let addr: SocketAddr = format!("{}:{}", api_config.host, api_config.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.stop().await;
    match index.persist_all().await {
        Ok(count) => info!("Flushed {} hot records before exit", count),
        Err(e) => error!("Final flush failed: {}", e),
    }
    index.close().await?;

    info!("Node shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
