// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! synckit server binary.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

use synckit_core::{Context, Executor, PostgresRowStore, RowStore, SyncService, TableRegistry};
use synckit_server::{AppState, ServerConfig, router};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("synckit=info".parse()?),
        )
        .init();

    info!("Starting synckit server");

    let config = ServerConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    let registry = Arc::new(TableRegistry::from_json_file(&config.tables_file)?);
    info!(
        http_addr = %config.http_addr,
        tables = ?registry.names(),
        max_wait_ms = config.executor.max_wait.as_millis() as u64,
        queue_capacity = config.executor.queue_capacity,
        "Configuration loaded"
    );

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;

    let store = Arc::new(PostgresRowStore::new(pool.clone()));
    store.health_check().await?;
    info!("Database health check passed");

    let executor = Arc::new(Executor::new(config.executor.clone()));
    let service = SyncService::new(store, registry, executor.clone());
    let root = Context::background();
    let app = router(AppState::new(service, root.clone()));

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    let drain = Context::background().with_timeout(config.shutdown_timeout);
    if let Err(e) = executor.shutdown(&drain).await {
        warn!(error = %e, "Executor did not drain before the shutdown timeout");
    }
    root.cancel();

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}
