//! Drop-target identifiers.
//!
//! A target id is either `{column}` (the column background) or
//! `{column}:{item}` (adjacent to a specific card in that column).

use crate::domain::item::{ColumnId, ItemId};
use crate::error::{KanbanError, Result};
use std::{fmt, str::FromStr};

pub const TARGET_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DropTargetId {
    Column(ColumnId),
    Sibling { column: ColumnId, item: ItemId },
}

impl DropTargetId {
    pub fn column(&self) -> &ColumnId {
        match self {
            Self::Column(column) => column,
            Self::Sibling { column, .. } => column,
        }
    }

    pub fn sibling(&self) -> Option<&ItemId> {
        match self {
            Self::Column(_) => None,
            Self::Sibling { item, .. } => Some(item),
        }
    }
}

impl FromStr for DropTargetId {
    type Err = KanbanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(TARGET_SEPARATOR) {
            None => ColumnId::from_str(s)
                .map(Self::Column)
                .map_err(|_| KanbanError::InvalidDropTarget(s.to_string())),
            Some((column, item)) => {
                let column = ColumnId::from_str(column)
                    .map_err(|_| KanbanError::InvalidDropTarget(s.to_string()))?;
                let item = ItemId::from_str(item)
                    .map_err(|_| KanbanError::InvalidDropTarget(s.to_string()))?;
                Ok(Self::Sibling { column, item })
            }
        }
    }
}

impl fmt::Display for DropTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(column) => write!(f, "{}", column),
            Self::Sibling { column, item } => write!(f, "{}{}{}", column, TARGET_SEPARATOR, item),
        }
    }
}
