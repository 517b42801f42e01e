// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Executor configuration loading from environment variables.

use std::time::Duration;

/// Executor tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Upper bound on a whole submission (queue wait plus execution). Zero means no limit.
    pub max_wait: Duration,
    /// Tear down a domain runner after this long without a task. Zero means never.
    pub idle_evict_after: Duration,
    /// Tasks buffered per domain before submissions block. Floor of 1.
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(30),
            idle_evict_after: Duration::from_secs(300),
            queue_capacity: 64,
        }
    }
}

impl ExecutorConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `SYNCKIT_EXECUTOR_MAX_WAIT_MS`: submission bound in ms, 0 disables (default: 30000)
    /// - `SYNCKIT_EXECUTOR_IDLE_EVICT_SECS`: idle runner eviction, 0 disables (default: 300)
    /// - `SYNCKIT_EXECUTOR_QUEUE_CAPACITY`: per-domain queue size (default: 64)
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_wait_ms: u64 = parse_var("SYNCKIT_EXECUTOR_MAX_WAIT_MS", 30_000, "must be a non-negative integer")?;
        let idle_secs: u64 = parse_var("SYNCKIT_EXECUTOR_IDLE_EVICT_SECS", 300, "must be a non-negative integer")?;
        let queue_capacity: usize = parse_var("SYNCKIT_EXECUTOR_QUEUE_CAPACITY", 64, "must be a positive integer")?;

        if queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "SYNCKIT_EXECUTOR_QUEUE_CAPACITY",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            max_wait: Duration::from_millis(max_wait_ms),
            idle_evict_after: Duration::from_secs(idle_secs),
            queue_capacity,
        })
    }
}

/// Read `name` and parse it, falling back to `default` when unset.
pub fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    default: T,
    reason: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name, reason)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),

    /// Two table descriptors share a physical table name.
    #[error("table '{0}' is described more than once")]
    DuplicateTable(String),

    /// A table descriptor is unusable.
    #[error("invalid descriptor for table '{table}': {reason}")]
    InvalidDescriptor {
        /// The table named by the descriptor.
        table: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A configuration file could not be loaded.
    #[error("failed to load {path}: {reason}")]
    File {
        /// The file that failed to load.
        path: String,
        /// What went wrong.
        reason: String,
    },
}
