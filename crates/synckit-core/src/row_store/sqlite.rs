// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed row store, for embedded deployments and tests.

use std::path::Path;

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, SqlitePool, Transaction, TypeInfo, ValueRef};

use crate::error::{Error, Result};
use crate::row::{Row, Value};
use crate::table::{ColumnInfo, PRIMARY_KEY, Statement};

use super::{Dialect, RowStore, RowTransaction};

/// Row store over a SQLite pool.
#[derive(Clone)]
pub struct SqliteRowStore {
    pool: SqlitePool,
}

impl SqliteRowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;
        Ok(Self { pool })
    }

    /// A private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RowStore for SqliteRowStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"SELECT name, type, "notnull", pk FROM pragma_table_info(?) ORDER BY cid"#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        let key_count = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("pk"))
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|pk| *pk > 0)
            .count();

        rows.iter()
            .map(|row| -> Result<ColumnInfo> {
                let data_type: String = row.try_get("type")?;
                let is_key = row.try_get::<i64, _>("pk")? > 0;
                // A lone INTEGER PRIMARY KEY aliases the rowid.
                let generated = is_key && key_count == 1 && data_type.eq_ignore_ascii_case("INTEGER");
                Ok(ColumnInfo {
                    name: row.try_get::<String, _>("name")?.to_lowercase(),
                    not_null: is_key || row.try_get::<i64, _>("notnull")? != 0,
                    constraint_type: is_key.then(|| PRIMARY_KEY.to_string()),
                    generated,
                    udt_name: None,
                    data_type,
                })
            })
            .collect()
    }

    async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let keys: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info(?) WHERE pk > 0 ORDER BY pk")
                .bind(table)
                .fetch_all(&self.pool)
                .await?;
        Ok(keys.into_iter().map(|k| k.to_lowercase()).collect())
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        let rows = bind_all(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let done = bind_all(sqlx::query(&statement.sql), &statement.params)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn RowTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl RowTransaction for SqliteTransaction {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        let rows = bind_all(sqlx::query(&statement.sql), &statement.params)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        let done = bind_all(sqlx::query(&statement.sql), &statement.params)
            .execute(&mut *self.tx)
            .await?;
        Ok(done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(x) => query.bind(*x),
            Value::Text(s) => query.bind(s.clone()),
            Value::Timestamp(t) => query.bind(*t),
        };
    }
    query
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        // The storage class of the value itself, not the declared column type.
        let storage = raw.type_info().name().to_string();
        let value = if raw.is_null() {
            Value::Null
        } else {
            match storage.as_str() {
                "INTEGER" if column.type_info().name() == "BOOLEAN" => {
                    Value::Bool(row.try_get_unchecked::<i64, _>(i)? != 0)
                }
                "INTEGER" => Value::Int(row.try_get_unchecked(i)?),
                "REAL" => Value::Float(row.try_get_unchecked(i)?),
                "TEXT" => Value::Text(row.try_get_unchecked(i)?),
                "BLOB" => {
                    let bytes: Vec<u8> = row.try_get_unchecked(i)?;
                    Value::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                other => {
                    return Err(Error::Internal(format!(
                        "unsupported sqlite storage class {other} in column {}",
                        column.name()
                    )));
                }
            }
        };
        out.insert(column.name().to_lowercase(), value);
    }
    Ok(out)
}
