// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for synckit-core sync tests.
//!
//! Provides TestContext with an in-memory SQLite row store, a small table
//! registry and an executor wired into a SyncService.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use synckit_core::row::row;
use synckit_core::{
    Context, Executor, ExecutorConfig, Row, RowStore, SqliteRowStore, Statement, SyncService,
    TableDescriptor, TableRegistry, Value,
};

/// Test context that owns the row store and the service under test.
pub struct TestContext {
    pub store: SqliteRowStore,
    pub service: SyncService,
    pub ctx: Context,
}

impl TestContext {
    /// Create the schema and the default descriptors:
    /// - `t`: tenant-scoped, column `v`
    /// - `lines`: tenant-scoped, composite key with `line` exempt from prefix checks
    /// - `logs`: global, server-generated key
    pub async fn new() -> Self {
        Self::with_descriptors(vec![
            TableDescriptor::new("t").with_columns(["v"]),
            TableDescriptor::new("lines")
                .with_columns(["qty", "note"])
                .skip_pk_prefix_check(["line"])
                .since_days(30),
            TableDescriptor::new("logs")
                .with_columns(["msg"])
                .global(true)
                .full_sync(true),
        ])
        .await
    }

    pub async fn with_descriptors(descriptors: Vec<TableDescriptor>) -> Self {
        let store = SqliteRowStore::in_memory().await.expect("open sqlite");
        for ddl in [
            "CREATE TABLE t (tenant_id TEXT NOT NULL PRIMARY KEY, v TEXT, internal TEXT, sync_at INTEGER NOT NULL DEFAULT 0)",
            "CREATE TABLE lines (tenant_id TEXT NOT NULL, line INTEGER NOT NULL, qty REAL, note TEXT, \
             sync_at INTEGER NOT NULL DEFAULT 0, PRIMARY KEY (tenant_id, line))",
            "CREATE TABLE logs (id INTEGER PRIMARY KEY, msg TEXT, sync_at INTEGER NOT NULL DEFAULT 0)",
        ] {
            sqlx::query(ddl)
                .execute(store.pool())
                .await
                .expect("create table");
        }

        let registry = TableRegistry::new(descriptors).expect("valid descriptors");
        let executor = Arc::new(Executor::new(ExecutorConfig {
            max_wait: Duration::from_secs(5),
            idle_evict_after: Duration::ZERO,
            queue_capacity: 16,
        }));
        let service = SyncService::new(Arc::new(store.clone()), Arc::new(registry), executor);

        Self {
            store,
            service,
            ctx: Context::background(),
        }
    }

    /// Insert a row into `t`.
    pub async fn seed(&self, tenant_id: &str, v: &str, sync_at: i64) {
        self.store
            .execute(&Statement {
                sql: "INSERT INTO t (tenant_id, v, internal, sync_at) VALUES (?, ?, ?, ?)".into(),
                params: vec![
                    Value::from(tenant_id),
                    Value::from(v),
                    Value::from("server-only"),
                    Value::Int(sync_at),
                ],
            })
            .await
            .expect("seed row");
    }

    /// Every row of `table`, ordered by its first column.
    pub async fn dump(&self, table: &str) -> Vec<Row> {
        self.store
            .query(&Statement {
                sql: format!("SELECT * FROM {table} ORDER BY 1, 2"),
                params: vec![],
            })
            .await
            .expect("dump table")
    }

    /// The row of `t` with the given key.
    pub async fn get(&self, tenant_id: &str) -> Option<Row> {
        self.store
            .query(&Statement {
                sql: "SELECT * FROM t WHERE tenant_id = ?".into(),
                params: vec![Value::from(tenant_id)],
            })
            .await
            .expect("query row")
            .pop()
    }
}

/// Shorthand for a `t` row as a client would send it.
pub fn t_row(tenant_id: &str, v: &str) -> Row {
    row([("tenant_id", Value::from(tenant_id)), ("v", Value::from(v))])
}
