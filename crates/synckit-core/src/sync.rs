// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Table-sync service.
//!
//! Two operations, both serialized through the [`Executor`]:
//!
//! - [`SyncService::describe_tables`], keyed by tenant, tells a client how to
//!   create its local replica of each table and where its first watermark is.
//! - [`SyncService::sync_table`], keyed by `<tenant>.<table>`, upserts the rows a
//!   client sends and returns the rows changed on the server since the client's
//!   watermark that the client did not just send itself.
//!
//! A sync runs in one row-store transaction. Every incoming row is validated
//! (key presence, tenant scope, writability) before the first write, so a
//! rejected request leaves the table untouched.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::executor::{Context, Executor};
use crate::row::{Row, SYNC_AT, Value, composite_identifier, normalize_row};
use crate::row_store::RowStore;
use crate::table::{ColumnInfo, TableDescriptor, TableRegistry};

/// Rows per `INSERT ... ON CONFLICT` statement.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// What a client needs to replicate one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    /// `CREATE TABLE IF NOT EXISTS` for the client replica.
    pub script: String,
    /// First watermark for a fresh client, in ms since epoch.
    pub start_sync: i64,
    pub retention_days: u32,
    pub read_only: bool,
}

/// One client sync round for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub table_name: String,
    /// Client watermark in ms since epoch.
    #[serde(default)]
    pub sync_at: i64,
    #[serde(default)]
    pub payload: Vec<Row>,
}

/// Server answer to a [`SyncRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Primary-key columns of the table, in key order.
    pub identifiers: Vec<String>,
    /// Server rows newer than the watermark that the client did not send.
    pub payload: Vec<Row>,
}

/// Table-sync operations over a [`RowStore`].
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn RowStore>,
    registry: Arc<TableRegistry>,
    executor: Arc<Executor>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("dialect", &self.store.dialect())
            .field("tables", &self.registry.len())
            .field("executor", &self.executor)
            .finish()
    }
}

impl SyncService {
    pub fn new(store: Arc<dyn RowStore>, registry: Arc<TableRegistry>, executor: Arc<Executor>) -> Self {
        Self {
            store,
            registry,
            executor,
        }
    }

    pub fn store(&self) -> &Arc<dyn RowStore> {
        &self.store
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Describe `tables` for `tenant`. Duplicate names are described once.
    #[instrument(skip(self, ctx, tables), fields(requested = tables.len()))]
    pub async fn describe_tables(&self, ctx: &Context, tenant: &str, tables: Vec<String>) -> Result<Vec<TableInfo>> {
        if tenant.is_empty() {
            return Err(Error::BadRequest("tenant must not be empty".to_string()));
        }
        let mut seen = HashSet::new();
        let tables: Vec<String> = tables
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();
        if tables.is_empty() {
            return Err(Error::BadRequest("no tables requested".to_string()));
        }

        let this = self.clone();
        self.executor
            .submit(ctx, tenant, move |task_ctx| async move { this.describe(task_ctx, tables).await })
            .await
    }

    async fn describe(&self, ctx: Context, tables: Vec<String>) -> Result<Vec<TableInfo>> {
        let now = Utc::now();
        let mut infos = Vec::with_capacity(tables.len());
        for name in tables {
            let descriptor = self.registry.get(&name)?;
            let columns = self.physical_columns(&ctx, descriptor).await?;
            infos.push(TableInfo {
                table_name: descriptor.table.clone(),
                script: descriptor.create_statement(&columns),
                start_sync: descriptor.start_sync(now),
                retention_days: descriptor.retention_days(),
                read_only: descriptor.is_read_only(&columns),
            });
        }
        Ok(infos)
    }

    /// Reconcile one table for `tenant`.
    #[instrument(skip(self, ctx, request), fields(table = %request.table_name, rows = request.payload.len()))]
    pub async fn sync_table(&self, ctx: &Context, tenant: &str, request: SyncRequest) -> Result<SyncResponse> {
        if tenant.is_empty() {
            return Err(Error::BadRequest("tenant must not be empty".to_string()));
        }
        let table = request.table_name.trim().to_lowercase();
        if table.is_empty() {
            return Err(Error::BadRequest("table_name must not be empty".to_string()));
        }

        let domain = format!("{tenant}.{table}");
        let tenant = tenant.to_string();
        let this = self.clone();
        self.executor
            .submit(ctx, &domain, move |task_ctx| async move {
                this.reconcile(task_ctx, &tenant, &table, request.sync_at, request.payload)
                    .await
            })
            .await
    }

    async fn reconcile(
        &self,
        ctx: Context,
        tenant: &str,
        table: &str,
        watermark: i64,
        payload: Vec<Row>,
    ) -> Result<SyncResponse> {
        let descriptor = self.registry.get(table)?;
        let columns = self.physical_columns(&ctx, descriptor).await?;
        let primary_keys = ctx.run(self.store.primary_keys(&descriptor.table)).await??;
        if primary_keys.is_empty() {
            return Err(Error::Internal(format!("table '{table}' has no primary key")));
        }
        if !payload.is_empty() && descriptor.is_read_only(&columns) {
            return Err(Error::Forbidden(descriptor.table.clone()));
        }

        let now_ms = Utc::now().timestamp_millis();
        let incoming = prepare_rows(descriptor, &columns, &primary_keys, tenant, payload, now_ms)?;
        let sent: HashSet<&str> = incoming.iter().map(|(id, _)| id.as_str()).collect();

        let mut tx = ctx.run(self.store.begin()).await??;

        let select = descriptor.select_statement(&columns, &primary_keys, tenant, watermark);
        let server_rows = ctx.run(tx.query(&select)).await??;

        let mut written = 0u64;
        for (column_set, rows) in group_by_columns(&incoming) {
            let group_columns: Vec<&ColumnInfo> = columns
                .iter()
                .filter(|c| column_set.contains(&c.name.as_str()))
                .collect();
            for batch in rows.chunks(UPSERT_BATCH_SIZE) {
                let statement = descriptor.upsert_statement(&group_columns, &primary_keys, batch, self.store.dialect());
                written += ctx.run(tx.execute(&statement)).await??;
            }
        }

        ctx.run(tx.commit()).await??;

        let selected = server_rows.len();
        let payload: Vec<Row> = server_rows
            .into_iter()
            .filter(|row| descriptor.in_scope(row, &primary_keys, tenant))
            .filter(|row| {
                composite_identifier(row, &primary_keys).map_or(true, |id| !sent.contains(id.as_str()))
            })
            .collect();

        info!(
            table = %descriptor.table,
            received = incoming.len(),
            written,
            selected,
            returned = payload.len(),
            "Table synced"
        );

        Ok(SyncResponse {
            identifiers: primary_keys,
            payload,
        })
    }

    async fn physical_columns(&self, ctx: &Context, descriptor: &TableDescriptor) -> Result<Vec<ColumnInfo>> {
        let columns = ctx.run(self.store.columns(&descriptor.table)).await??;
        if columns.is_empty() {
            return Err(Error::Internal(format!(
                "table '{}' does not exist in the row store",
                descriptor.table
            )));
        }
        Ok(columns)
    }
}

/// Normalize, filter, validate and stamp incoming rows.
///
/// Returns `(composite identifier, row)` pairs in first-seen order; a later row
/// with the same identifier replaces an earlier one.
fn prepare_rows(
    descriptor: &TableDescriptor,
    columns: &[ColumnInfo],
    primary_keys: &[String],
    tenant: &str,
    payload: Vec<Row>,
    now_ms: i64,
) -> Result<Vec<(String, Row)>> {
    let has_sync_at = columns.iter().any(|c| c.name == SYNC_AT);
    let mut rows: Vec<(String, Row)> = Vec::with_capacity(payload.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in payload {
        let mut row = normalize_row(row);
        let before = row.len();
        row.retain(|name, _| {
            columns.iter().any(|c| &c.name == name)
                && (primary_keys.contains(name) || descriptor.allows_column(name))
        });
        if row.len() != before {
            debug!(dropped = before - row.len(), "Dropped columns outside the descriptor");
        }

        let id = composite_identifier(&row, primary_keys).map_err(|column| Error::MissingKey {
            column: column.to_string(),
        })?;
        descriptor.validate_scope(&row, primary_keys, tenant)?;
        if has_sync_at {
            row.insert(SYNC_AT.to_string(), Value::Int(now_ms));
        }

        match index.get(&id) {
            Some(&at) => rows[at].1 = row,
            None => {
                index.insert(id.clone(), rows.len());
                rows.push((id, row));
            }
        }
    }
    Ok(rows)
}

/// Group rows by their exact column set so no statement nulls a column a row omitted.
fn group_by_columns(rows: &[(String, Row)]) -> BTreeMap<Vec<&str>, Vec<Row>> {
    let mut groups: BTreeMap<Vec<&str>, Vec<Row>> = BTreeMap::new();
    for (_, row) in rows {
        let key: Vec<&str> = row.keys().map(String::as_str).collect();
        groups.entry(key).or_default().push(row.clone());
    }
    groups
}
