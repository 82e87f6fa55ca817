//! Blob storage for chat attachments.
//!
//! Attachments are stored under a caller-chosen slash path and addressed
//! afterwards by a retrievable URL. [`FsBlobStore`] keeps them on the local
//! filesystem and hands out `{base_url}/{path}` URLs.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::RemoteError;

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `data` at `path` and return its retrievable URL.
    async fn put(&self, path: &str, data: &[u8]) -> Result<String, RemoteError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    async fn delete(&self, path: &str) -> Result<(), RemoteError>;
}

/// Resolve `rel` below `base`, refusing anything that would escape it.
fn ensure_within(base: &Path, rel: &str) -> Result<PathBuf, RemoteError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RemoteError::InvalidPath(rel.to_string()));
            }
            Component::CurDir => {}
        }
    }
    if resolved == canonical_base || !resolved.starts_with(&canonical_base) {
        return Err(RemoteError::InvalidPath(rel.to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    base_url: String,
    max_size: usize,
}

impl FsBlobStore {
    pub async fn new(
        base_path: PathBuf,
        base_url: impl Into<String>,
        max_size: usize,
    ) -> Result<Self, RemoteError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            RemoteError::BlobStorage(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// URL under which a blob stored at `path` is served.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStore {
    async fn put(&self, path: &str, data: &[u8]) -> Result<String, RemoteError> {
        if data.is_empty() {
            return Err(RemoteError::BlobStorage("Empty blob".to_string()));
        }
        if data.len() > self.max_size {
            return Err(RemoteError::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let target = ensure_within(&self.base_path, path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                RemoteError::BlobStorage(format!("Failed to create '{}': {}", parent.display(), e))
            })?;
        }
        fs::write(&target, data)
            .await
            .map_err(|e| RemoteError::BlobStorage(format!("Failed to write blob {}: {}", path, e)))?;

        debug!(path, size = data.len(), "Stored blob");
        Ok(self.url_for(path))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let target = ensure_within(&self.base_path, path)?;
        if !target.exists() {
            return Err(RemoteError::BlobNotFound(path.to_string()));
        }
        fs::read(&target)
            .await
            .map_err(|e| RemoteError::BlobStorage(format!("Failed to read blob {}: {}", path, e)))
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let target = ensure_within(&self.base_path, path)?;
        if !target.exists() {
            return Err(RemoteError::BlobNotFound(path.to_string()));
        }
        fs::remove_file(&target).await.map_err(|e| {
            RemoteError::BlobStorage(format!("Failed to delete blob {}: {}", path, e))
        })?;

        debug!(path, "Deleted blob");
        Ok(())
    }
}
