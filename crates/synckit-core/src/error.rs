// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for synckit-core.
//!
//! Every kind is distinguishable at the call site and carries a stable
//! `error_code()` the HTTP layer forwards to clients.

use thiserror::Error;

use crate::executor::{ContextError, ExecutorError};

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The executor refused or abandoned the submission.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The request named a table with no descriptor.
    #[error("table '{0}' is not registered for sync")]
    NotRegistered(String),

    /// An incoming row lacks a primary-key value.
    #[error("row is missing primary key column '{column}'")]
    MissingKey {
        /// The absent primary-key column.
        column: String,
    },

    /// A primary-key value lies outside the caller's tenant.
    #[error("primary key '{column}' value '{value}' is outside tenant '{tenant}'")]
    BadScope {
        /// The offending primary-key column.
        column: String,
        /// The rejected value, rendered.
        value: String,
        /// The caller's tenant.
        tenant: String,
    },

    /// The table does not accept client writes.
    #[error("table '{0}' is read-only")]
    Forbidden(String),

    /// The request is malformed.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Unexpected state.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ContextError> for Error {
    fn from(err: ContextError) -> Self {
        Self::Executor(err.into())
    }
}

/// Result type using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Executor(e) => e.error_code(),
            Self::NotRegistered(_) => "NOT_REGISTERED",
            Self::MissingKey { .. } => "MISSING_KEY",
            Self::BadScope { .. } => "BAD_SCOPE",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Database(_) | Self::Io(_) => "TRANSIENT_IO",
            Self::Json(_) => "BAD_REQUEST",
            Self::Config(_) => "CONFIG",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this is a wrapped infrastructure failure the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Io(_))
    }
}
