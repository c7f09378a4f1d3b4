//! Attachment bytes on the local filesystem.
//!
//! Keys are relative, `/`-separated paths (`workspace/room/uuid-filename`).
//! Every key is validated before it touches the filesystem so that no key can
//! resolve outside the base directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Empty blob")]
    Empty,

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlobError>;

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Write `data` under `key` and return the key it was stored under.
    async fn save(&self, key: &str, data: &[u8]) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Largest blob `save` accepts.
    fn max_size(&self) -> usize;
}

/// Check that `target` stays within `base` once `..` components are taken
/// into account.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            _ => {
                return Err(BlobError::InvalidKey(target.display().to_string()));
            }
        }
    }
    if !resolved.starts_with(base) {
        return Err(BlobError::InvalidKey(target.display().to_string()));
    }
    Ok(resolved)
}

fn validate_key(key: &str) -> Result<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.contains('\0')
        || key
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(BlobError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl LocalBlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self> {
        fs::create_dir_all(&base_path).await?;
        let base_path = base_path.canonicalize()?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        ensure_within(&self.base_path, &self.base_path.join(key))
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStore {
    async fn save(&self, key: &str, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Err(BlobError::Empty);
        }
        if data.len() > self.max_size {
            return Err(BlobError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;

        debug!(key, size = data.len(), "Stored blob");
        Ok(key.to_string())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (LocalBlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf(), 1024)
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn save_get_delete() {
        let (store, _dir) = test_store().await;

        let key = store.save("ws/room/abc-report.pdf", b"pdf-bytes").await.unwrap();
        assert_eq!(key, "ws/room/abc-report.pdf");
        assert_eq!(store.get(&key).await.unwrap(), b"pdf-bytes");

        store.delete(&key).await.unwrap();
        assert!(matches!(store.get(&key).await, Err(BlobError::NotFound(_))));
        assert!(matches!(store.delete(&key).await, Err(BlobError::NotFound(_))));
    }

    #[tokio::test]
    async fn empty_and_oversized_blobs_rejected() {
        let (store, _dir) = test_store().await;
        assert!(matches!(store.save("a/b", b"").await, Err(BlobError::Empty)));
        assert!(matches!(
            store.save("a/b", &[0u8; 2048]).await,
            Err(BlobError::TooLarge { size: 2048, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn traversal_keys_rejected() {
        let (store, dir) = test_store().await;
        for key in ["../escape", "a/../../escape", "/etc/passwd", "a\\b", "a//b", ""] {
            assert!(
                matches!(store.save(key, b"x").await, Err(BlobError::InvalidKey(_))),
                "key {key:?} accepted"
            );
        }
        assert!(!dir.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn ensure_within_rejects_parent_components() {
        let base = Path::new("/srv/blobs");
        assert!(ensure_within(base, &base.join("a/b")).is_ok());
        assert!(ensure_within(base, &base.join("a/../../x")).is_err());
    }
}
