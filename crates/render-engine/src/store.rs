//! Artifact storage for finished exports.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use storyreel_common::error::{StoryreelError, StoryreelResult};

/// Durable destination for a finished artifact.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store `bytes` under `key` and return a reference to the stored copy.
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> StoryreelResult<String>;

    fn name(&self) -> &str;
}

/// Stores artifacts as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `key` below the root. Absolute keys and `..` are rejected.
    pub fn path_for(&self, key: &str) -> StoryreelResult<PathBuf> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StoryreelError::storage(format!("invalid storage key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for LocalDirStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> StoryreelResult<String> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoryreelError::storage(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| StoryreelError::storage(format!("{}: {e}", path.display())))?;

        tracing::info!(
            path = %path.display(),
            size = bytes.len(),
            content_type,
            "Artifact stored"
        );
        Ok(format!("file://{}", path.display()))
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_writes_below_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDirStore::new(dir.path());
        let url = store
            .put("exports/42/video.mp4", Bytes::from_static(b"mp4"), "video/mp4")
            .await
            .unwrap();

        let path = dir.path().join("exports/42/video.mp4");
        assert_eq!(std::fs::read(&path).unwrap(), b"mp4");
        assert_eq!(url, format!("file://{}", path.display()));
    }

    #[test]
    fn test_escaping_keys_are_rejected() {
        let store = LocalDirStore::new("/tmp/storyreel");
        assert!(store.path_for("../etc/passwd").is_err());
        assert!(store.path_for("/abs/video.mp4").is_err());
        assert!(store.path_for("").is_err());
        assert!(store.path_for("a/b.mp4").is_ok());
    }
}
