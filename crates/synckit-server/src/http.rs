// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP routes for the sync protocol.
//!
//! | Method | Path | Body | Data |
//! |--------|------|------|------|
//! | `POST` | `/v1/sync_data/tabla_info` | `["orders", ...]` | `[TableInfo]` |
//! | `POST` | `/v1/sync_data/sync` | `SyncRequest` | `SyncResponse` |
//! | `GET`  | `/health` | | store status |
//!
//! Successful responses are wrapped as `{"message": "OK", "data": ...}`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use synckit_core::{Context, SyncRequest, SyncResponse, SyncService, TableInfo};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::ApiError;
use crate::tenant::Tenant;

/// Shared handler state.
#[derive(Clone, Debug)]
pub struct AppState {
    pub service: SyncService,
    /// Parent of every request context.
    pub root: Context,
}

impl AppState {
    pub fn new(service: SyncService, root: Context) -> Self {
        Self { service, root }
    }
}

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub message: &'static str,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { message: "OK", data })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sync_data/tabla_info", post(table_info))
        .route("/v1/sync_data/sync", post(sync))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn table_info(
    State(state): State<AppState>,
    tenant: Tenant,
    body: Bytes,
) -> Result<Json<Envelope<Vec<TableInfo>>>, ApiError> {
    let tables: Vec<String> = serde_json::from_slice(&body)?;
    let ctx = state.root.child();
    let infos = state.service.describe_tables(&ctx, tenant.as_str(), tables).await?;
    Ok(Envelope::ok(infos))
}

async fn sync(
    State(state): State<AppState>,
    tenant: Tenant,
    body: Bytes,
) -> Result<Json<Envelope<SyncResponse>>, ApiError> {
    let request: SyncRequest = serde_json::from_slice(&body)?;
    let ctx = state.root.child();
    let response = state.service.sync_table(&ctx, tenant.as_str(), request).await?;
    Ok(Envelope::ok(response))
}

async fn health(State(state): State<AppState>) -> Response {
    let executor = state.service.executor();
    if executor.is_closed() {
        return unhealthy("executor is closed");
    }
    if let Err(e) = state.service.store().health_check().await {
        warn!(error = %e, "Health check failed");
        return unhealthy("row store unreachable");
    }

    Envelope::ok(json!({
        "status": "healthy",
        "tables": state.service.registry().len(),
        "in_flight": executor.in_flight(),
        "live_runners": executor.live_runners(),
    }))
    .into_response()
}

fn unhealthy(reason: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "message": reason, "code": "UNAVAILABLE" })),
    )
        .into_response()
}
