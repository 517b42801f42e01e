// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! File cache configuration loading from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::{MIN_EVICT_INTERVAL, MIN_MAX_ENTRIES};

/// Configuration for the file cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCacheConfig {
    /// Cache root directory.
    pub base_dir: PathBuf,
    /// Entries kept after an eviction tick.
    pub max_entries: usize,
    /// Time between eviction ticks.
    pub evict_interval: Duration,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(".data/cache"),
            max_entries: 1000,
            evict_interval: Duration::from_secs(3600),
        }
    }
}

impl FileCacheConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `SYNCKIT_CACHE_DIR`: cache root (default: .data/cache)
    /// - `SYNCKIT_CACHE_MAX_ENTRIES`: entries kept after eviction (default: 1000, floor 50)
    /// - `SYNCKIT_CACHE_EVICT_INTERVAL_SECS`: seconds between eviction ticks (default: 3600, floor 3600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_dir = match std::env::var("SYNCKIT_CACHE_DIR") {
            Ok(dir) if dir.trim().is_empty() => {
                return Err(ConfigError::Invalid("SYNCKIT_CACHE_DIR", "must not be empty"));
            }
            Ok(dir) => PathBuf::from(dir),
            Err(_) => Self::default().base_dir,
        };
        let max_entries: usize =
            parse_var("SYNCKIT_CACHE_MAX_ENTRIES", 1000, "must be a non-negative integer")?;
        let evict_secs: u64 = parse_var(
            "SYNCKIT_CACHE_EVICT_INTERVAL_SECS",
            3600,
            "must be a non-negative integer",
        )?;

        Ok(Self {
            base_dir,
            max_entries,
            evict_interval: Duration::from_secs(evict_secs),
        }
        .clamped())
    }

    /// Raise `max_entries` and `evict_interval` to their floors.
    pub fn clamped(self) -> Self {
        Self {
            max_entries: self.max_entries.max(MIN_MAX_ENTRIES),
            evict_interval: self.evict_interval.max(MIN_EVICT_INTERVAL),
            ..self
        }
    }
}

fn parse_var<T: std::str::FromStr>(
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
    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
