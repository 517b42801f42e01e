// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! synckit storage - bounded local file cache and storage decorators
//!
//! # Layout on disk
//!
//! ```text
//! <base_dir>/
//! ├── .file_access.db        last-read time per filename (SQLite, WAL)
//! ├── e1/bc/example.txt      first four hex chars of SHA-1("example.txt")
//! └── cb/56/test.jpg
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use synckit_storage::{CachedStorage, FileCache, FileCacheConfig, LocalStorage, Storage};
//! use tokio_util::sync::CancellationToken;
//!
//! let shutdown = CancellationToken::new();
//! let cache = Arc::new(FileCache::open(FileCacheConfig::from_env()?, shutdown.clone()).await?);
//! let storage = CachedStorage::new(LocalStorage::new("/srv/objects").await?, cache.clone());
//!
//! storage.put("invoice-17.pdf", &bytes).await?;
//! let again = storage.get("invoice-17.pdf").await?; // served from the cache
//!
//! cache.close().await;
//! ```
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SYNCKIT_CACHE_DIR` | `.data/cache` | Cache root |
//! | `SYNCKIT_CACHE_MAX_ENTRIES` | `1000` | Entries kept after an eviction tick (floor 50) |
//! | `SYNCKIT_CACHE_EVICT_INTERVAL_SECS` | `3600` | Seconds between ticks (floor 3600) |

pub mod cache;
pub mod config;
pub mod error;
pub mod hash;
pub mod metadata;
pub mod storage;

pub use cache::FileCache;
pub use config::{ConfigError, FileCacheConfig};
pub use error::{Result, StorageError};
pub use hash::hashed_path;
pub use metadata::MetadataStore;
pub use storage::{CachedStorage, LocalStorage, Storage};
