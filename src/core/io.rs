use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

/// Byte-level file access for the workflow. Paths are plain strings so tests and
/// non-disk backends can stand in.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Replaces `path` as a whole; readers never observe a half-written file.
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Regular files directly inside `dir`, sorted. A missing directory lists as empty.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;

    async fn read_to_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).with_context(|| format!("{} is not valid UTF-8", path))
    }
}

#[derive(Debug, Default)]
pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = Path::new(path);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let staging = format!("{}.part", path);
        tokio::fs::write(&staging, content)
            .await
            .with_context(|| format!("Failed to write {}", staging))?;
        tokio::fs::rename(&staging, target)
            .await
            .with_context(|| format!("Failed to move {} into place", path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        if !tokio::fs::try_exists(dir).await? {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to list {}", dir))?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path().to_string_lossy().into_owned());
            }
        }
        files.sort();
        Ok(files)
    }
}
