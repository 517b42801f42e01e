// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! synckit core - per-domain serial execution and tenant-scoped table sync
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     HTTP layer (synckit-server)                  │
//! │              tenant resolved, request → Context                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SyncService                             │
//! │   describe_tables (key: tenant) / sync_table (key: tenant.table) │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │ submit(ctx, key, task)
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Executor                               │
//! │       one bounded queue + one consumer task per domain key       │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌──────────────────────┐   ┌──────────────────────────────────────┐
//! │   TableRegistry      │   │ RowStore (PostgreSQL / SQLite)       │
//! │   TableDescriptor    │   │ metadata, queries, transactions      │
//! └──────────────────────┘   └──────────────────────────────────────┘
//! ```
//!
//! # Sync protocol
//!
//! | Operation | Executor key | Result |
//! |-----------|--------------|--------|
//! | `describe_tables` | `<tenant>` | create script, first watermark, retention, read-only flag per table |
//! | `sync_table` | `<tenant>.<table>` | key columns and the server rows the client has not seen |
//!
//! Rows of tenant-scoped tables carry the tenant as a dotted prefix of their
//! primary-key values (`acme.42`). A sync that would write a row outside the
//! caller's tenant fails with [`Error::BadScope`] before anything is written.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SYNCKIT_EXECUTOR_MAX_WAIT_MS` | No | `30000` | Bound on one submission, 0 disables |
//! | `SYNCKIT_EXECUTOR_IDLE_EVICT_SECS` | No | `300` | Idle runner teardown, 0 disables |
//! | `SYNCKIT_EXECUTOR_QUEUE_CAPACITY` | No | `64` | Tasks buffered per domain |
//!
//! # Modules
//!
//! - [`config`]: Executor configuration from environment variables
//! - [`error`]: Error types with stable error codes
//! - [`executor`]: Per-domain serial executor and [`Context`]
//! - [`row`]: Dynamic row model and composite identifiers
//! - [`row_store`]: Row-store trait with PostgreSQL and SQLite backends
//! - [`sync`]: The sync service
//! - [`table`]: Table descriptors, statement builders, registry

/// Executor configuration loaded from environment variables.
pub mod config;

/// Error types with stable error codes.
pub mod error;

/// Per-domain serial executor.
pub mod executor;

/// Rows exchanged with clients and the row store.
pub mod row;

/// Row-store abstraction and backends.
pub mod row_store;

/// Describe and sync operations.
pub mod sync;

/// Table descriptors and derived statements.
pub mod table;

pub use config::{ConfigError, ExecutorConfig};
pub use error::{Error, Result};
pub use executor::{Context, ContextError, Executor, ExecutorError};
pub use row::{Row, Value};
pub use row_store::{Dialect, PostgresRowStore, RowStore, RowTransaction, SqliteRowStore};
pub use sync::{SyncRequest, SyncResponse, SyncService, TableInfo};
pub use table::{ColumnInfo, Statement, TableDescriptor, TableRegistry};
