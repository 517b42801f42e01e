// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Object storage abstraction with a local backend and a caching decorator.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{FileCache, TEMP_PREFIX};
use crate::error::{Result, StorageError};
use crate::hash::validate_name;

/// Named byte objects.
///
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch an object. Fails with [`StorageError::NotFound`] when absent.
    async fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Create or replace an object.
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    async fn exists(&self, name: &str) -> Result<bool>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Arc<S> {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        (**self).get(name).await
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        (**self).put(name, bytes).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        (**self).delete(name).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        (**self).exists(name).await
    }
}

/// Flat directory of objects, one file per name.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Use `root` as the object directory, creating it if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path(name)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(name)?;
        let tmp = self.root.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(name)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path(name)?).await?)
    }
}

/// Read-through, write-through cache in front of another [`Storage`].
///
/// A failure to populate the cache after a successful backend read is logged
/// and does not fail the read.
pub struct CachedStorage<S> {
    backend: S,
    cache: Arc<FileCache>,
}

impl<S: Storage> CachedStorage<S> {
    pub fn new(backend: S, cache: Arc<FileCache>) -> Self {
        Self { backend, cache }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<FileCache> {
        &self.cache
    }
}

#[async_trait]
impl<S: Storage> Storage for CachedStorage<S> {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        match self.cache.read(name).await {
            Ok(bytes) => return Ok(bytes),
            Err(StorageError::NotCached) => {}
            Err(e) => warn!(name, error = %e, "Cache read failed, falling back to backend"),
        }

        let bytes = self.backend.get(name).await?;
        if let Err(e) = self.cache.write(name, &bytes).await {
            warn!(name, error = %e, "Failed to populate cache");
        } else {
            debug!(name, "Cache populated from backend");
        }
        Ok(bytes)
    }

    async fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.backend.put(name, bytes).await?;
        self.cache.write(name, bytes).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.backend.delete(name).await?;
        self.cache.remove(name).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        if self.cache.contains(name) {
            return Ok(true);
        }
        self.backend.exists(name).await
    }
}
