// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Table descriptors and the statements derived from them.
//!
//! A [`TableDescriptor`] tells the sync service how to treat one physical table:
//! which columns clients may see, whether rows are tenant-scoped, and how far
//! back a fresh client should start. Every function here is deterministic over
//! the descriptor and the physical column metadata reported by the row store.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::{Error, Result};
use crate::row::{Row, SYNC_AT, Value};
use crate::row_store::Dialect;

/// Audit columns every synchronized table may carry regardless of its descriptor.
pub const METADATA_COLUMNS: [&str; 6] = [
    "created_at",
    "created_by",
    "updated_at",
    "updated_by",
    "deleted_at",
    SYNC_AT,
];

/// Constraint type reported for primary-key columns.
pub const PRIMARY_KEY: &str = "PRIMARY KEY";

/// Physical column metadata as reported by the row store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Lowercase column name.
    pub name: String,
    /// Declared data type, e.g. `character varying` or `INTEGER`.
    pub data_type: String,
    /// Whether the column is declared `NOT NULL`.
    pub not_null: bool,
    /// `PRIMARY KEY` for key columns.
    pub constraint_type: Option<String>,
    /// Values are assigned by the server (identity, sequence, rowid alias).
    pub generated: bool,
    /// Backend type name used to cast bound values, when the backend needs one.
    pub udt_name: Option<String>,
}

impl ColumnInfo {
    /// A nullable, non-key column of the given type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            constraint_type: None,
            generated: false,
            udt_name: None,
        }
    }

    /// Mark the column `NOT NULL`.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Mark the column as part of the primary key (implies `NOT NULL`).
    pub fn primary_key(mut self) -> Self {
        self.not_null = true;
        self.constraint_type = Some(PRIMARY_KEY.to_string());
        self
    }

    /// Mark the column as server generated.
    pub fn generated(mut self) -> Self {
        self.generated = true;
        self
    }

    /// Whether the column belongs to the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.constraint_type.as_deref() == Some(PRIMARY_KEY)
    }
}

/// A parameterized statement with `?` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Declarative configuration for one synchronized table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Physical table name, unique across descriptors.
    pub table: String,
    /// Columns clients may synchronize, in addition to keys and metadata columns.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Rows are shared by all tenants; no prefix enforcement.
    #[serde(default)]
    pub global: bool,
    /// Retention window for fresh clients in days. Zero means full history.
    #[serde(default)]
    pub since_days: u32,
    /// Always ship every row; no watermark filter.
    #[serde(default)]
    pub full_sync: bool,
    /// Primary-key columns exempt from tenant-prefix validation.
    #[serde(default)]
    pub skip_pk_prefix_check: Vec<String>,
}

impl TableDescriptor {
    /// A tenant-scoped descriptor with no extra columns.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            global: false,
            since_days: 0,
            full_sync: false,
            skip_pk_prefix_check: Vec::new(),
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    pub fn since_days(mut self, days: u32) -> Self {
        self.since_days = days;
        self
    }

    pub fn full_sync(mut self, full_sync: bool) -> Self {
        self.full_sync = full_sync;
        self
    }

    pub fn skip_pk_prefix_check<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_pk_prefix_check = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Whether clients may carry `name` as a non-key column.
    pub fn allows_column(&self, name: &str) -> bool {
        METADATA_COLUMNS.contains(&name) || self.columns.iter().any(|c| c == name)
    }

    fn skips_prefix_check(&self, column: &str) -> bool {
        self.skip_pk_prefix_check.iter().any(|c| c == column)
    }

    /// The physical columns visible to clients, in metadata order.
    pub fn kept_columns<'a>(&'a self, columns: &'a [ColumnInfo]) -> impl Iterator<Item = &'a ColumnInfo> + 'a {
        columns
            .iter()
            .filter(|c| c.is_primary_key() || self.allows_column(&c.name))
    }

    /// `CREATE TABLE IF NOT EXISTS` for the client-side replica.
    ///
    /// Varchar types become `TEXT` and numerics become `REAL`; other types pass
    /// through. Key columns are collected into one trailing `PRIMARY KEY(...)`.
    pub fn create_statement(&self, columns: &[ColumnInfo]) -> String {
        let mut defs = Vec::new();
        let mut keys = Vec::new();
        for column in self.kept_columns(columns) {
            let mut def = format!("{} {}", column.name, client_type(&column.data_type));
            if column.not_null {
                def.push_str(" not null");
            }
            defs.push(def);
            if column.is_primary_key() {
                keys.push(column.name.as_str());
            }
        }
        if !keys.is_empty() {
            defs.push(format!("PRIMARY KEY({})", keys.join(", ")));
        }
        format!("CREATE TABLE IF NOT EXISTS {}({})", self.table, defs.join(", "))
    }

    /// `SELECT` for the rows a client at `watermark` has not seen yet.
    ///
    /// Tenant-scoped tables filter on the first primary key that is subject to
    /// prefix validation; tables that are not `full_sync` filter on `sync_at`.
    pub fn select_statement(
        &self,
        columns: &[ColumnInfo],
        primary_keys: &[String],
        tenant: &str,
        watermark: i64,
    ) -> Statement {
        let names: Vec<&str> = self.kept_columns(columns).map(|c| c.name.as_str()).collect();
        let mut sql = format!("SELECT {} FROM {}", names.join(", "), self.table);
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if !self.global
            && let Some(scoped) = primary_keys.iter().find(|pk| !self.skips_prefix_check(pk))
        {
            clauses.push(format!("{scoped} LIKE ?"));
            params.push(Value::Text(format!("{tenant}.%")));
        }
        if !self.full_sync {
            clauses.push(format!("{SYNC_AT} > ?"));
            params.push(Value::Int(watermark));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        Statement { sql, params }
    }

    /// Watermark a fresh client starts from, in milliseconds since epoch.
    pub fn start_sync(&self, now: DateTime<Utc>) -> i64 {
        if self.full_sync || self.since_days == 0 {
            return 0;
        }
        (now - Duration::days(i64::from(self.since_days))).timestamp_millis()
    }

    /// Retention window reported to clients.
    pub fn retention_days(&self) -> u32 {
        if self.full_sync { 0 } else { self.since_days }
    }

    /// Clients may not write when any key column is assigned by the server.
    pub fn is_read_only(&self, columns: &[ColumnInfo]) -> bool {
        columns.iter().any(|c| c.is_primary_key() && c.generated)
    }

    /// Check that every prefix-checked key of `row` belongs to `tenant`.
    pub fn validate_scope(&self, row: &Row, primary_keys: &[String], tenant: &str) -> Result<()> {
        match self.scope_violation(row, primary_keys, tenant) {
            None => Ok(()),
            Some((column, value)) => Err(Error::BadScope {
                column: column.clone(),
                value: value.to_string(),
                tenant: tenant.to_string(),
            }),
        }
    }

    /// Whether every prefix-checked key of `row` belongs to `tenant`.
    ///
    /// The comparison is exact and case-sensitive, unlike the `LIKE` filter in
    /// [`select_statement`](Self::select_statement).
    pub fn in_scope(&self, row: &Row, primary_keys: &[String], tenant: &str) -> bool {
        self.scope_violation(row, primary_keys, tenant).is_none()
    }

    fn scope_violation<'a>(
        &self,
        row: &'a Row,
        primary_keys: &'a [String],
        tenant: &str,
    ) -> Option<(&'a String, &'a Value)> {
        static NULL: Value = Value::Null;
        if self.global {
            return None;
        }
        primary_keys
            .iter()
            .filter(|pk| !self.skips_prefix_check(pk))
            .map(|column| (column, row.get(column).unwrap_or(&NULL)))
            .find(|(_, value)| {
                !value.as_str().is_some_and(|s| {
                    s.strip_prefix(tenant)
                        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
                })
            })
    }

    /// Multi-row `INSERT ... ON CONFLICT` over `columns` for `rows`.
    ///
    /// Columns a row lacks bind as `NULL`, so callers group rows by column set.
    /// When every column is a key the conflict action is `DO NOTHING`.
    pub fn upsert_statement(
        &self,
        columns: &[&ColumnInfo],
        primary_keys: &[String],
        rows: &[Row],
        dialect: Dialect,
    ) -> Statement {
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        let tuple = format!(
            "({})",
            columns
                .iter()
                .map(|c| dialect.placeholder(c))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut params = Vec::with_capacity(rows.len() * columns.len());
        for row in rows {
            for column in columns {
                params.push(row.get(&column.name).cloned().unwrap_or(Value::Null));
            }
        }

        let updates: Vec<String> = names
            .iter()
            .filter(|name| !primary_keys.iter().any(|pk| pk == *name))
            .map(|name| format!("{name} = excluded.{name}"))
            .collect();
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT({}) {}",
            self.table,
            names.join(", "),
            vec![tuple; rows.len()].join(", "),
            primary_keys.join(", "),
            action
        );

        Statement { sql, params }
    }
}

fn client_type(data_type: &str) -> &str {
    let lower = data_type.to_ascii_lowercase();
    if lower.starts_with("character varying") || lower.starts_with("varchar") {
        "TEXT"
    } else if lower.starts_with("numeric") {
        "REAL"
    } else {
        data_type
    }
}

/// Descriptors by physical table name.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    tables: HashMap<String, TableDescriptor>,
}

impl TableRegistry {
    /// Build a registry. Names are lowercased to match row-store metadata.
    pub fn new<I>(descriptors: I) -> std::result::Result<Self, ConfigError>
    where
        I: IntoIterator<Item = TableDescriptor>,
    {
        let mut tables = HashMap::new();
        for mut descriptor in descriptors {
            descriptor.table = descriptor.table.trim().to_lowercase();
            if descriptor.table.is_empty() {
                return Err(ConfigError::InvalidDescriptor {
                    table: descriptor.table,
                    reason: "table name must not be empty",
                });
            }
            for column in descriptor
                .columns
                .iter_mut()
                .chain(descriptor.skip_pk_prefix_check.iter_mut())
            {
                *column = column.to_lowercase();
            }
            if tables.contains_key(&descriptor.table) {
                return Err(ConfigError::DuplicateTable(descriptor.table));
            }
            tables.insert(descriptor.table.clone(), descriptor);
        }
        Ok(Self { tables })
    }

    /// Load a JSON array of descriptors.
    pub fn from_json_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let path = path.as_ref();
        let file_error = |reason: String| ConfigError::File {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let descriptors: Vec<TableDescriptor> =
            serde_json::from_str(&raw).map_err(|e| file_error(e.to_string()))?;
        Self::new(descriptors)
    }

    /// Look up the descriptor for `table`.
    pub fn get(&self, table: &str) -> Result<&TableDescriptor> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::NotRegistered(table.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Registered table names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
