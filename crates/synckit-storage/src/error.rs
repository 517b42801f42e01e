// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for synckit-storage.

use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The file is not in the local cache. Expected on a cold read.
    #[error("file is not cached")]
    NotCached,

    /// The backend has no object with this name.
    #[error("file '{0}' not found")]
    NotFound(String),

    /// The name cannot be mapped to a path safely.
    #[error("invalid file name '{0}'")]
    InvalidName(String),

    /// The cache has been closed.
    #[error("file cache is closed")]
    Closed,

    /// Filesystem operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata store operation failed.
    #[error("metadata store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type using [`StorageError`].
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotCached => "NOT_CACHED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidName(_) => "INVALID_NAME",
            Self::Closed => "CLOSED",
            Self::Io(_) | Self::Database(_) => "TRANSIENT_IO",
        }
    }

    /// Whether this is a wrapped infrastructure failure the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Database(_))
    }
}
