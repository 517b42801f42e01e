// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded local file cache with least-recently-read eviction.
//!
//! Files live at `<base_dir>/<hh>/<hh>/<filename>` (see [`hashed_path`]). An
//! in-memory presence set of hashed paths answers "is it cached" without a
//! syscall, and a [`MetadataStore`] at the top of `base_dir` keeps the last-read
//! time of every filename. A background loop deletes the least recently read
//! files whenever the store holds more than `max_entries` rows.
//!
//! The presence set is kept consistent with disk after every public operation:
//! a write adds the entry, a read that finds the file gone removes it, and
//! eviction removes what it deletes.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::FileCacheConfig;
use crate::error::{Result, StorageError};
use crate::hash::hashed_path;
use crate::metadata::MetadataStore;

/// Name of the metadata database at the top of the cache directory.
pub const METADATA_FILE: &str = ".file_access.db";

/// Prefix of in-progress write files.
pub const TEMP_PREFIX: &str = ".tmp-";

/// Smallest accepted `max_entries`.
pub const MIN_MAX_ENTRIES: usize = 50;

/// Shortest accepted eviction interval.
pub const MIN_EVICT_INTERVAL: Duration = Duration::from_secs(3600);

/// Local write-through file cache.
pub struct FileCache {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    base_dir: PathBuf,
    max_entries: usize,
    present: RwLock<HashSet<PathBuf>>,
    metadata: MetadataStore,
    /// Shared by writes and removals, exclusive while one victim is evicted.
    gate: tokio::sync::RwLock<()>,
    stop: CancellationToken,
    closed: AtomicBool,
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("base_dir", &self.inner.base_dir)
            .field("max_entries", &self.inner.max_entries)
            .field("entries", &self.len())
            .finish()
    }
}

impl FileCache {
    /// Open the cache, index files already on disk and start the eviction loop.
    ///
    /// Limits below [`MIN_MAX_ENTRIES`] and [`MIN_EVICT_INTERVAL`] are raised to
    /// those floors. The loop stops when `shutdown` is cancelled or on [`close`](Self::close).
    pub async fn open(config: FileCacheConfig, shutdown: CancellationToken) -> Result<Self> {
        Self::start(config.clamped(), shutdown).await
    }

    pub(crate) async fn start(config: FileCacheConfig, shutdown: CancellationToken) -> Result<Self> {
        tokio::fs::create_dir_all(&config.base_dir).await?;
        let metadata = MetadataStore::open(config.base_dir.join(METADATA_FILE)).await?;

        let inner = Arc::new(Inner {
            base_dir: config.base_dir.clone(),
            max_entries: config.max_entries,
            present: RwLock::new(HashSet::new()),
            metadata,
            gate: tokio::sync::RwLock::new(()),
            stop: shutdown.child_token(),
            closed: AtomicBool::new(false),
        });

        let indexed = inner.index_existing().await?;
        info!(
            base_dir = %config.base_dir.display(),
            max_entries = config.max_entries,
            evict_interval_secs = config.evict_interval.as_secs(),
            indexed,
            "File cache opened"
        );

        let worker = tokio::spawn(run_eviction(inner.clone(), config.evict_interval));
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.inner.base_dir
    }

    /// Number of entries in the presence set.
    pub fn len(&self) -> usize {
        self.inner.present().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `filename` is believed to be on disk.
    pub fn contains(&self, filename: &str) -> bool {
        hashed_path(filename).is_ok_and(|rel| self.inner.present().contains(&rel))
    }

    /// Read a cached file and refresh its last-read time.
    ///
    /// Fails with [`StorageError::NotCached`] when the file is unknown or has
    /// disappeared from disk; in the latter case the entry is dropped.
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let rel = hashed_path(filename)?;
        if !self.inner.present().contains(&rel) {
            return Err(StorageError::NotCached);
        }

        match tokio::fs::read(self.inner.base_dir.join(&rel)).await {
            Ok(bytes) => {
                self.inner.metadata.upsert(filename, Utc::now()).await?;
                Ok(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(filename, "Cached file vanished from disk");
                self.inner.forget(&rel);
                self.inner.metadata.delete(filename).await?;
                Err(StorageError::NotCached)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store `bytes` under `filename`, replacing any previous content.
    ///
    /// Content is written to a temporary sibling and renamed into place, so a
    /// reader sees either the old or the new file, never a partial one.
    pub async fn write(&self, filename: &str, bytes: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let rel = hashed_path(filename)?;
        let path = self.inner.base_dir.join(&rel);
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidName(filename.to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        let _gate = self.inner.gate.read().await;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        self.inner.present_mut().insert(rel);
        self.inner.metadata.upsert(filename, Utc::now()).await?;
        debug!(filename, size = bytes.len(), "File cached");
        Ok(())
    }

    /// Drop `filename` from the cache. Missing files are not an error.
    pub async fn remove(&self, filename: &str) -> Result<()> {
        self.ensure_open()?;
        let rel = hashed_path(filename)?;
        let _gate = self.inner.gate.read().await;
        match tokio::fs::remove_file(self.inner.base_dir.join(&rel)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.inner.forget(&rel);
        self.inner.metadata.delete(filename).await?;
        Ok(())
    }

    /// Run one eviction tick now. Returns the number of evicted files.
    pub async fn evict_once(&self) -> Result<usize> {
        self.ensure_open()?;
        self.inner.evict_once().await
    }

    /// Last recorded read of `filename`, from the metadata store.
    pub async fn last_read(&self, filename: &str) -> Result<Option<chrono::DateTime<Utc>>> {
        self.inner.metadata.last_read(filename).await
    }

    /// Stop the eviction loop and close the metadata store.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "File cache eviction loop failed");
            }
        }
        self.inner.metadata.close().await;
        info!(base_dir = %self.inner.base_dir.display(), "File cache closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl Drop for FileCache {
    fn drop(&mut self) {
        self.inner.stop.cancel();
    }
}

impl Inner {
    fn present(&self) -> std::sync::RwLockReadGuard<'_, HashSet<PathBuf>> {
        self.present.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn present_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashSet<PathBuf>> {
        self.present.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn forget(&self, rel: &Path) {
        self.present_mut().remove(rel);
    }

    /// Walk `base_dir` and register every file stored at its hashed path.
    async fn index_existing(&self) -> Result<usize> {
        let now = Utc::now();
        let mut found = Vec::new();
        let mut dirs = vec![self.base_dir.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    dirs.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with(METADATA_FILE) {
                    continue;
                }
                if name.starts_with(TEMP_PREFIX) {
                    debug!(path = %path.display(), "Removing interrupted write");
                    let _ = tokio::fs::remove_file(&path).await;
                    continue;
                }

                let Ok(rel) = path.strip_prefix(&self.base_dir).map(Path::to_path_buf) else {
                    continue;
                };
                match hashed_path(&name) {
                    Ok(expected) if expected == rel => found.push((name, rel)),
                    _ => debug!(path = %path.display(), "Skipping file outside its hashed location"),
                }
            }
        }

        for (name, _) in &found {
            self.metadata.insert_if_new(name, now).await?;
        }
        let count = found.len();
        self.present_mut().extend(found.into_iter().map(|(_, rel)| rel));
        Ok(count)
    }

    async fn evict_once(&self) -> Result<usize> {
        let victims = self.metadata.eviction_candidates(self.max_entries).await?;
        self.evict(victims).await
    }

    /// Evict `(filename, last_read_ms)` pairs, skipping any entry read or
    /// rewritten since it was selected.
    async fn evict(&self, victims: Vec<(String, i64)>) -> Result<usize> {
        let mut evicted = 0;

        for (name, seen) in victims {
            let rel = match hashed_path(&name) {
                Ok(rel) => rel,
                Err(_) => {
                    self.metadata.delete(&name).await?;
                    continue;
                }
            };

            let _gate = self.gate.write().await;
            if !self.metadata.delete_if_unchanged(&name, seen).await? {
                debug!(filename = %name, "Skipping eviction of refreshed file");
                continue;
            }
            match tokio::fs::remove_file(self.base_dir.join(&rel)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    // Keep the entry indexed; it is retried on the next tick.
                    warn!(filename = %name, error = %e, "Failed to evict cached file");
                    let at = DateTime::from_timestamp_millis(seen).unwrap_or_else(Utc::now);
                    self.metadata.insert_if_new(&name, at).await?;
                    continue;
                }
            }
            self.forget(&rel);
            evicted += 1;
        }

        Ok(evicted)
    }
}

async fn run_eviction(inner: Arc<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = inner.stop.cancelled() => {
                info!("File cache eviction loop received shutdown signal");
                break;
            }

            _ = ticker.tick() => {
                match inner.evict_once().await {
                    Ok(0) => debug!("Eviction tick found nothing to evict"),
                    Ok(evicted) => info!(evicted, "Evicted least recently read files"),
                    Err(e) => error!(error = %e, "Eviction tick failed"),
                }
            }
        }
    }
}
