// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed row store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgPool, Postgres, Row as _, Transaction, TypeInfo, ValueRef};

use crate::error::{Error, Result};
use crate::row::{Row, Value};
use crate::table::{ColumnInfo, PRIMARY_KEY, Statement};

use super::{Dialect, RowStore, RowTransaction};

/// Row store over a PostgreSQL pool, scoped to the connection's `current_schema()`.
#[derive(Clone)]
pub struct PostgresRowStore {
    pool: PgPool,
}

impl PostgresRowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RowStore for PostgresRowStore {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT c.column_name::text AS name,
                   c.data_type::text AS data_type,
                   (c.is_nullable::text = 'NO') AS not_null,
                   pk.constraint_type AS constraint_type,
                   (c.is_identity::text = 'YES'
                    OR COALESCE(c.column_default::text, '') LIKE 'nextval(%') AS generated,
                   c.udt_name::text AS udt_name
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT kcu.column_name::text AS column_name, tc.constraint_type::text AS constraint_type
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON kcu.constraint_schema = tc.constraint_schema
                 AND kcu.constraint_name = tc.constraint_name
                WHERE tc.constraint_type = 'PRIMARY KEY'
                  AND tc.table_schema = current_schema()
                  AND tc.table_name = $1
            ) pk ON pk.column_name = c.column_name::text
            WHERE c.table_schema = current_schema()
              AND c.table_name = $1
            ORDER BY c.ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ColumnInfo> {
                Ok(ColumnInfo {
                    name: row.try_get::<String, _>("name")?.to_lowercase(),
                    data_type: row.try_get("data_type")?,
                    not_null: row.try_get("not_null")?,
                    constraint_type: row.try_get("constraint_type")?,
                    generated: row.try_get("generated")?,
                    udt_name: row.try_get("udt_name")?,
                })
            })
            .collect()
    }

    async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT kcu.column_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON kcu.constraint_schema = tc.constraint_schema
             AND kcu.constraint_name = tc.constraint_name
            WHERE tc.constraint_type = $2
              AND tc.table_schema = current_schema()
              AND tc.table_name = $1
            ORDER BY kcu.ordinal_position
            "#,
        )
        .bind(table)
        .bind(PRIMARY_KEY)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys.into_iter().map(|k| k.to_lowercase()).collect())
    }

    async fn query(&self, statement: &Statement) -> Result<Vec<Row>> {
        let sql = rebind(&statement.sql);
        let rows = bind_all(sqlx::query(&sql), &statement.params)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let sql = rebind(&statement.sql);
        let done = bind_all(sqlx::query(&sql), &statement.params)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn RowTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RowTransaction for PostgresTransaction {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        let sql = rebind(&statement.sql);
        let rows = bind_all(sqlx::query(&sql), &statement.params)
            .fetch_all(&mut *self.tx)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        let sql = rebind(&statement.sql);
        let done = bind_all(sqlx::query(&sql), &statement.params)
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

/// Rewrite `?` placeholders to `$1, $2, ...`, leaving quoted text and identifiers alone.
pub(crate) fn rebind(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut quote: Option<char> = None;
    for ch in sql.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (Some(_), c) => out.push(c),
            (None, '\'' | '"') => {
                quote = Some(ch);
                out.push(ch);
            }
            (None, '?') => {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            (None, c) => out.push(c),
        }
    }
    out
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
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

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = if row.try_get_raw(i)?.is_null() {
            Value::Null
        } else {
            decode_value(row, i, column.type_info().name())?
        };
        out.insert(column.name().to_lowercase(), value);
    }
    Ok(out)
}

fn decode_value(row: &PgRow, i: usize, type_name: &str) -> Result<Value> {
    let value = match type_name {
        "BOOL" => Value::Bool(row.try_get(i)?),
        "INT2" => Value::Int(i64::from(row.try_get::<i16, _>(i)?)),
        "INT4" => Value::Int(i64::from(row.try_get::<i32, _>(i)?)),
        "INT8" => Value::Int(row.try_get(i)?),
        "FLOAT4" => Value::Float(f64::from(row.try_get::<f32, _>(i)?)),
        "FLOAT8" => Value::Float(row.try_get(i)?),
        "NUMERIC" => {
            let d: Decimal = row.try_get(i)?;
            Value::Float(
                d.to_f64()
                    .ok_or_else(|| Error::Internal(format!("numeric {d} does not fit f64")))?,
            )
        }
        "TIMESTAMPTZ" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(i)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get::<NaiveDateTime, _>(i)?.and_utc()),
        "DATE" => Value::Text(row.try_get::<NaiveDate, _>(i)?.to_string()),
        "TIME" => Value::Text(row.try_get::<NaiveTime, _>(i)?.to_string()),
        "UUID" => Value::Text(row.try_get::<uuid::Uuid, _>(i)?.to_string()),
        "JSON" | "JSONB" => Value::Text(row.try_get::<serde_json::Value, _>(i)?.to_string()),
        // text, varchar, bpchar, name, enums
        _ => Value::Text(row.try_get_unchecked::<String, _>(i)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebind_numbers_placeholders_in_order() {
        assert_eq!(
            rebind("SELECT a FROM t WHERE a LIKE ? AND sync_at > ?"),
            "SELECT a FROM t WHERE a LIKE $1 AND sync_at > $2"
        );
        assert_eq!(
            rebind("INSERT INTO t (a, b) VALUES (CAST(? AS text), ?), (CAST(? AS text), ?)"),
            "INSERT INTO t (a, b) VALUES (CAST($1 AS text), $2), (CAST($3 AS text), $4)"
        );
    }

    #[test]
    fn test_rebind_ignores_quoted_question_marks() {
        assert_eq!(
            rebind(r#"SELECT '?' AS q, "odd?col" FROM t WHERE x = ?"#),
            r#"SELECT '?' AS q, "odd?col" FROM t WHERE x = $1"#
        );
        // Doubled quotes close and reopen the literal.
        assert_eq!(rebind("SELECT 'it''s?' WHERE y = ?"), "SELECT 'it''s?' WHERE y = $1");
    }

    #[test]
    fn test_rebind_without_placeholders_is_identity() {
        assert_eq!(rebind("SELECT 1"), "SELECT 1");
    }
}
