// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Dynamic rows exchanged with clients and the row store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A row: lowercase column name to scalar value.
pub type Row = BTreeMap<String, Value>;

/// Column holding the sync watermark (integer milliseconds since epoch).
pub const SYNC_AT: &str = "sync_at";

/// Scalar column value.
///
/// JSON strings always deserialize as [`Value::Text`]; [`Value::Timestamp`] only
/// comes from the row store and serializes as RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL `NULL` / JSON `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// Point in time.
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Whether this is `NULL`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The text payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }
}

/// Renders the value the way it takes part in composite identifiers.
///
/// Strings pass through, integers are base-10, floats use the shortest decimal
/// that round-trips, booleans are `true`/`false`, timestamps are RFC 3339 and
/// `NULL` renders empty.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => f.write_str(s),
            Self::Timestamp(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Self::Timestamp(t)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Lowercase every column name. On collisions the last key in map order wins.
pub fn normalize_row(row: Row) -> Row {
    if row.keys().all(|k| !k.chars().any(char::is_uppercase)) {
        return row;
    }
    row.into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect()
}

/// Concatenate the rendered primary-key values of `row`, in `primary_keys` order.
///
/// Returns the first primary-key column that is absent or `NULL` as the error.
pub fn composite_identifier<'a>(row: &Row, primary_keys: &'a [String]) -> Result<String, &'a str> {
    let mut id = String::new();
    for column in primary_keys {
        match row.get(column) {
            Some(value) if !value.is_null() => id.push_str(&value.to_string()),
            _ => return Err(column.as_str()),
        }
    }
    Ok(id)
}

/// Build a [`Row`] from `(column, value)` pairs.
///
/// ```
/// use synckit_core::row::{row, Value};
///
/// let r = row([("tenant_id", Value::from("acme.1")), ("v", Value::from(3i64))]);
/// assert_eq!(r.len(), 2);
/// ```
pub fn row<I, K>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
