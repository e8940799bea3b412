use crate::error::Result;
use crate::sync::item::SyncQueueItem;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Durable home of the pending sync queue
///
/// The worker saves the whole queue after every change and loads it once at
/// start, so operations queued while offline survive a restart.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Loads the persisted queue, empty if nothing was saved yet
    async fn load(&self) -> Result<Vec<SyncQueueItem>>;

    /// Replaces the persisted queue
    async fn save(&self, items: &[SyncQueueItem]) -> Result<()>;
}

/// Queue snapshot kept as a single JSON file
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn ensure_directory_exists(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn load(&self) -> Result<Vec<SyncQueueItem>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path).await?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    async fn save(&self, items: &[SyncQueueItem]) -> Result<()> {
        self.ensure_directory_exists().await?;
        let json = serde_json::to_string_pretty(items)?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
