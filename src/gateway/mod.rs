use crate::domain::{BoardId, ColumnId, Item, ItemId, ItemPatch};
use crate::error::KanbanError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod file_gateway;
pub mod memory;

pub use file_gateway::FileGateway;
pub use memory::MemoryGateway;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Failure reported by a remote store
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Rejected by remote store: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Whether the same request may succeed if sent again later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Storage(_))
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Rejected(format!("malformed record: {}", err))
    }
}

impl From<GatewayError> for KanbanError {
    fn from(err: GatewayError) -> Self {
        if err.is_transient() {
            KanbanError::TransientSyncFailure(err.to_string())
        } else {
            KanbanError::PermanentSyncFailure(err.to_string())
        }
    }
}

/// Partial item payload sent to the remote store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(flatten)]
    pub fields: ItemPatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ColumnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl ItemUpdate {
    pub fn fields(fields: ItemPatch) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn placement(status: ColumnId, position: usize) -> Self {
        Self {
            status: Some(status),
            position: Some(position),
            ..Self::default()
        }
    }

    /// Applies the update to a stored copy of the item
    pub fn apply_to(&self, item: &mut Item) {
        item.apply_patch(&self.fields);
        if self.status.is_some() || self.position.is_some() {
            let status = self.status.clone().unwrap_or_else(|| item.status.clone());
            let position = self.position.unwrap_or(item.position);
            item.place(status, position);
        }
    }
}

/// Client for the remote data store
///
/// Every call must be safe to repeat: the sync queue may resend a request
/// after a transient failure without knowing whether the first attempt
/// landed.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Creates (or overwrites) an item and returns the stored copy
    async fn create_item(&self, item: &Item) -> GatewayResult<Item>;

    /// Applies a partial update to an existing item
    async fn update_item(&self, id: &ItemId, update: &ItemUpdate) -> GatewayResult<()>;

    /// Deletes an item; deleting an absent item succeeds
    async fn delete_item(&self, id: &ItemId) -> GatewayResult<()>;

    /// Replaces the listed columns of a board index; other columns are kept
    ///
    /// Stored items named in a listed column take that column as status and
    /// their rank in it as position.
    async fn update_board_index(
        &self,
        board_id: &BoardId,
        columns: &BTreeMap<ColumnId, Vec<ItemId>>,
    ) -> GatewayResult<()>;
}
