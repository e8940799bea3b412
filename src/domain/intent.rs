use crate::domain::item::{ColumnId, ItemId};
use serde::{Deserialize, Serialize};

/// The resolved outcome of a drag gesture, ready to apply
///
/// Produced by the move resolver (or built directly for keyboard reorders)
/// and consumed once by the consistency manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub item_id: ItemId,
    pub source_column: ColumnId,
    pub target_column: ColumnId,
    pub target_index: usize,
}

impl MoveIntent {
    pub fn new(
        item_id: ItemId,
        source_column: ColumnId,
        target_column: ColumnId,
        target_index: usize,
    ) -> Self {
        Self {
            item_id,
            source_column,
            target_column,
            target_index,
        }
    }

    pub fn is_cross_column(&self) -> bool {
        self.source_column != self.target_column
    }
}
