// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Row-store interface and backend implementations.
//!
//! The sync service never talks to a driver directly. It needs column metadata,
//! parameterized queries and statements, and a transaction to run them in;
//! [`RowStore`] is exactly that capability. Statements use `?` placeholders and
//! each backend adapts them to its own syntax.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresRowStore;
pub use self::sqlite::SqliteRowStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::row::Row;
use crate::table::{ColumnInfo, Statement};

/// SQL flavour spoken by a row store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Placeholder for a value bound into `column`.
    ///
    /// PostgreSQL infers parameter types from the bound value, so values are cast
    /// to the column type; text arriving for a timestamp or JSON column then
    /// converts server side.
    pub fn placeholder(self, column: &ColumnInfo) -> String {
        match (self, column.udt_name.as_deref()) {
            (Self::Postgres, Some(udt)) => format!("CAST(? AS {udt})"),
            _ => "?".to_string(),
        }
    }
}

/// Access to the tables being synchronized.
#[async_trait]
pub trait RowStore: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Physical columns of `table` in ordinal order. Empty when the table does not exist.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Primary-key column names of `table` in key order.
    async fn primary_keys(&self, table: &str) -> Result<Vec<String>>;

    async fn query(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run a statement, returning the number of affected rows.
    async fn execute(&self, statement: &Statement) -> Result<u64>;

    /// Start a transaction. Dropping it without commit rolls back.
    async fn begin(&self) -> Result<Box<dyn RowTransaction>>;

    /// Round-trip a trivial query.
    async fn health_check(&self) -> Result<()>;
}

/// An open row-store transaction.
#[async_trait]
pub trait RowTransaction: Send {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    async fn execute(&mut self, statement: &Statement) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
