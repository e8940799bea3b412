use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::KanbanError;
use crate::sync::{FileQueueStore, QueueStore};

const DEFAULT_RETRY_LIMIT: u32 = 3;
const MIN_RETRY_LIMIT: u32 = 1;
const MAX_RETRY_LIMIT: u32 = 20;
const DEFAULT_BASE_BACKOFF_MS: u64 = 1_000;
const MIN_BASE_BACKOFF_MS: u64 = 10;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const BACKOFF_CEILING_MS: u64 = 3_600_000;
const DEFAULT_LOG_LEVEL: &str = "warn";

/// Retry policy of the sync worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum attempts per operation, the first one included
    pub retry_limit: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl SyncConfig {
    /// Clamps every value into its supported range
    pub fn validate(&mut self) {
        self.retry_limit = self.retry_limit.clamp(MIN_RETRY_LIMIT, MAX_RETRY_LIMIT);
        self.base_backoff_ms = self
            .base_backoff_ms
            .clamp(MIN_BASE_BACKOFF_MS, BACKOFF_CEILING_MS);
        self.max_backoff_ms = self
            .max_backoff_ms
            .clamp(self.base_backoff_ms, BACKOFF_CEILING_MS);
    }

    pub fn apply(&mut self, patch: &SyncConfigPatch) {
        if let Some(retry_limit) = patch.retry_limit {
            self.retry_limit = retry_limit;
        }
        if let Some(base) = patch.base_backoff_ms {
            self.base_backoff_ms = base;
        }
        if let Some(max) = patch.max_backoff_ms {
            self.max_backoff_ms = max;
        }
        self.validate();
    }
}

/// Partial update sent with `SET_CONFIG`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
}

/// Engine settings, usually read from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub log_level: String,
    /// Where the pending sync queue is persisted; in-memory only when unset
    pub queue_path: Option<PathBuf>,
    pub sync: SyncConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            queue_path: None,
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Reads settings from `path`, falling back to defaults on any problem
    pub fn load_from_path(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_toml_str(&contents) {
                Ok(config) => config,
                Err(error) => {
                    warn!(
                        "failed to parse engine config '{}': {}",
                        path.display(),
                        error
                    );
                    Self::default()
                }
            },
            Err(error) => {
                warn!(
                    "failed to read engine config '{}': {}",
                    path.display(),
                    error
                );
                Self::default()
            }
        }
    }

    /// Parses and validates settings from TOML text
    pub fn from_toml_str(contents: &str) -> crate::error::Result<Self> {
        let mut config: Self = toml::from_str(contents)
            .map_err(|error| KanbanError::ConfigError(error.to_string()))?;
        config.validate();
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("invalid engine config path"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory '{}'", parent.display()))?;

        let mut validated = self.clone();
        validated.validate();
        let contents =
            toml::to_string_pretty(&validated).context("failed to serialize config to TOML")?;

        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow!("invalid engine config file name"))?
            .to_string_lossy()
            .to_string();
        let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));
        fs::write(&tmp_path, contents)
            .with_context(|| format!("failed to write '{}'", tmp_path.display()))?;
        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to replace '{}'", path.display()))?;
        Ok(())
    }

    /// Durable store for the sync queue, if a path is configured
    pub fn queue_store(&self) -> Option<Arc<dyn QueueStore>> {
        self.queue_path
            .as_ref()
            .map(|path| Arc::new(FileQueueStore::new(path)) as Arc<dyn QueueStore>)
    }

    pub fn validate(&mut self) {
        self.sync.validate();
        if crate::logging::normalize_log_level(&self.log_level).is_none() {
            warn!(level = %self.log_level, "unknown log level, using default");
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }
    }
}
