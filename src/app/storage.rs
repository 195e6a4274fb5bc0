//! Object storage for uploaded media.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Where uploaded objects live. Keys are `/`-separated relative paths.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, replacing any existing object.
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<()>;

    /// Remove the object at `key`. Removing a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Public URL at which `key` is served.
    fn url(&self, key: &str) -> String;
}

/// Stores objects as files under a root directory; the server exposes the
/// root under `public_url`.
pub struct FilesystemStore {
    root: PathBuf,
    public_url: String,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            anyhow::bail!("Invalid object key '{}'", key);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FilesystemStore {
    async fn put(&self, key: &str, data: &[u8], _content_type: &str) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        // Write to a temp file and rename so readers never see a partial object.
        let tmp = path.with_extension("part");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        file.write_all(data)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        file.flush().await?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move object into place at {}", path.display()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }
}
