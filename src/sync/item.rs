use crate::domain::{BoardId, ColumnId, Item, ItemId};
use crate::gateway::ItemUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Correlation id of one queued operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncItemId(Uuid);

impl SyncItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SyncItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Reorder,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Reorder => "reorder",
        };
        f.write_str(name)
    }
}

/// Id lists of the board columns an operation changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexChange {
    pub board_id: BoardId,
    /// The changed columns as they are after the operation
    pub columns: BTreeMap<ColumnId, Vec<ItemId>>,
    /// The same columns as they were before it; sent back when the operation is rejected
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub previous: BTreeMap<ColumnId, Vec<ItemId>>,
}

impl IndexChange {
    pub fn new(board_id: BoardId) -> Self {
        Self {
            board_id,
            columns: BTreeMap::new(),
            previous: BTreeMap::new(),
        }
    }

    /// Records one column before and after the operation
    pub fn column(mut self, column: ColumnId, previous: Vec<ItemId>, current: Vec<ItemId>) -> Self {
        self.previous.insert(column.clone(), previous);
        self.columns.insert(column, current);
        self
    }
}

/// A remote mutation waiting in the sync queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncOperation {
    Create {
        item: Item,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<IndexChange>,
    },
    Update {
        item_id: ItemId,
        changes: ItemUpdate,
    },
    Delete {
        item_id: ItemId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<IndexChange>,
    },
    /// A move: the item's new placement plus the id lists of every column it touched
    Reorder {
        item_id: ItemId,
        changes: ItemUpdate,
        index: IndexChange,
    },
}

impl SyncOperation {
    pub fn operation_type(&self) -> OperationType {
        match self {
            Self::Create { .. } => OperationType::Create,
            Self::Update { .. } => OperationType::Update,
            Self::Delete { .. } => OperationType::Delete,
            Self::Reorder { .. } => OperationType::Reorder,
        }
    }

    /// The item this operation concerns
    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::Create { item, .. } => &item.id,
            Self::Update { item_id, .. }
            | Self::Delete { item_id, .. }
            | Self::Reorder { item_id, .. } => item_id,
        }
    }

    /// Board index columns this operation rewrites, if any
    pub fn index_change(&self) -> Option<&IndexChange> {
        match self {
            Self::Create { index, .. } | Self::Delete { index, .. } => index.as_ref(),
            Self::Update { .. } => None,
            Self::Reorder { index, .. } => Some(index),
        }
    }

    /// Whether the item's fields and its placement are affected
    fn aspects(&self) -> (bool, bool) {
        match self {
            Self::Create { .. } | Self::Delete { .. } => (true, true),
            Self::Update { .. } => (true, false),
            Self::Reorder { .. } => (false, true),
        }
    }

    /// Whether this operation was computed on top of `earlier`
    ///
    /// That is the case when both change the same aspect of one item, or
    /// both rewrite the same board column. Such an operation must not reach
    /// the remote store before `earlier` has settled.
    pub fn depends_on(&self, earlier: &SyncOperation) -> bool {
        let (fields, placement) = self.aspects();
        let (earlier_fields, earlier_placement) = earlier.aspects();
        if self.item_id() == earlier.item_id()
            && ((fields && earlier_fields) || (placement && earlier_placement))
        {
            return true;
        }

        match (self.index_change(), earlier.index_change()) {
            (Some(mine), Some(theirs)) => {
                mine.board_id == theirs.board_id
                    && mine.columns.keys().any(|column| theirs.columns.contains_key(column))
            }
            _ => false,
        }
    }
}

/// Queue entry as owned by the worker
///
/// Callbacks stay with the sender; the worker only ever sees data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: SyncItemId,
    pub operation: SyncOperation,
    pub created_at: DateTime<Utc>,
    pub attempt_count: u32,
}

impl SyncQueueItem {
    pub fn new(operation: SyncOperation) -> Self {
        Self {
            id: SyncItemId::new(),
            operation,
            created_at: Utc::now(),
            attempt_count: 0,
        }
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation.operation_type()
    }
}
