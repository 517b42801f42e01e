// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! synckit server - HTTP surface for tenant-scoped table sync
//!
//! Wires a [`synckit_core::SyncService`] over PostgreSQL into an axum router.
//! Requests carry the tenant in the `x-tenant-id` header set by the
//! authenticating proxy.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SYNCKIT_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `SYNCKIT_TABLES_FILE` | Yes | - | JSON array of table descriptors |
//! | `SYNCKIT_HTTP_PORT` | No | `8080` | HTTP port |
//! | `SYNCKIT_DB_MAX_CONNECTIONS` | No | `10` | Pool size |
//! | `SYNCKIT_SHUTDOWN_TIMEOUT_SECS` | No | `30` | Bound on executor drain at shutdown |

pub mod config;
pub mod error;
pub mod http;
pub mod tenant;

pub use config::ServerConfig;
pub use error::ApiError;
pub use http::{AppState, router};
pub use tenant::{TENANT_HEADER, Tenant};
