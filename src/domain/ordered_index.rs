use crate::domain::{
    board::BoardConfig,
    item::{BoardId, ColumnId, Item, ItemId},
};
use crate::error::{KanbanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Where an item sits inside a board index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub column: ColumnId,
    pub index: usize,
}

impl Placement {
    pub fn new(column: ColumnId, index: usize) -> Self {
        Self { column, index }
    }
}

/// Result of a move: where the item was and where it ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMove {
    /// `None` when the item was not in the index before the move
    pub previous: Option<Placement>,
    pub placed: Placement,
}

impl IndexMove {
    pub fn is_noop(&self) -> bool {
        self.previous.as_ref() == Some(&self.placed)
    }
}

/// Per-board mapping of column id to an ordered, duplicate-free list of item ids
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedIndex {
    pub board_id: BoardId,
    columns: BTreeMap<ColumnId, Vec<ItemId>>,
}

impl OrderedIndex {
    /// Creates an empty index with one list per configured column
    pub fn new(config: &BoardConfig) -> Self {
        Self {
            board_id: config.id.clone(),
            columns: config
                .column_ids()
                .map(|id| (id.clone(), Vec::new()))
                .collect(),
        }
    }

    pub fn from_columns(board_id: BoardId, columns: BTreeMap<ColumnId, Vec<ItemId>>) -> Self {
        Self { board_id, columns }
    }

    pub fn column(&self, column: &ColumnId) -> Option<&[ItemId]> {
        self.columns.get(column).map(Vec::as_slice)
    }

    pub fn columns(&self) -> &BTreeMap<ColumnId, Vec<ItemId>> {
        &self.columns
    }

    pub fn has_column(&self, column: &ColumnId) -> bool {
        self.columns.contains_key(column)
    }

    /// Total number of entries across all columns
    pub fn len(&self) -> usize {
        self.columns.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds the column and rank of an item
    pub fn locate(&self, item_id: &ItemId) -> Option<Placement> {
        self.columns.iter().find_map(|(column, ids)| {
            ids.iter()
                .position(|id| id == item_id)
                .map(|index| Placement::new(column.clone(), index))
        })
    }

    /// Returns a moved copy of the index, leaving `self` untouched
    pub fn moved(
        &self,
        item_id: &ItemId,
        from: &ColumnId,
        to: &ColumnId,
        to_index: usize,
    ) -> Result<(OrderedIndex, IndexMove)> {
        let mut next = self.clone();
        let outcome = next.move_item(item_id, from, to, to_index)?;
        Ok((next, outcome))
    }

    /// Moves an item into `to` at `to_index`, clamped to the column length
    ///
    /// An item missing from `from` is not an error, which keeps retries
    /// idempotent. It is still removed from any other column so it can never
    /// appear twice.
    pub fn move_item(
        &mut self,
        item_id: &ItemId,
        from: &ColumnId,
        to: &ColumnId,
        to_index: usize,
    ) -> Result<IndexMove> {
        if !self.has_column(to) {
            return Err(KanbanError::UnknownColumn {
                board: self.board_id.to_string(),
                column: to.to_string(),
            });
        }

        let previous = match self.take_from(from, item_id) {
            Some(index) => Some(Placement::new(from.clone(), index)),
            None => {
                let stale = self.remove(item_id);
                if let Some(actual) = &stale {
                    debug!(
                        item = %item_id,
                        expected = %from,
                        actual = %actual.column,
                        "move source is stale, using actual placement"
                    );
                }
                stale
            }
        };

        let placed = self.insert_unchecked(item_id.clone(), to, to_index);
        debug!(item = %item_id, column = %placed.column, index = placed.index, "item moved");
        Ok(IndexMove { previous, placed })
    }

    /// Inserts a new item, failing if it is already present anywhere
    pub fn insert(&mut self, item_id: ItemId, column: &ColumnId, index: usize) -> Result<Placement> {
        if self.locate(&item_id).is_some() {
            return Err(KanbanError::DuplicateItem(item_id.to_string()));
        }
        if !self.has_column(column) {
            return Err(KanbanError::UnknownColumn {
                board: self.board_id.to_string(),
                column: column.to_string(),
            });
        }
        Ok(self.insert_unchecked(item_id, column, index))
    }

    /// Removes an item wherever it is, returning its former placement
    pub fn remove(&mut self, item_id: &ItemId) -> Option<Placement> {
        let placement = self.locate(item_id)?;
        if let Some(ids) = self.columns.get_mut(&placement.column) {
            ids.remove(placement.index);
        }
        Some(placement)
    }

    fn take_from(&mut self, column: &ColumnId, item_id: &ItemId) -> Option<usize> {
        let ids = self.columns.get_mut(column)?;
        let index = ids.iter().position(|id| id == item_id)?;
        ids.remove(index);
        Some(index)
    }

    fn insert_unchecked(&mut self, item_id: ItemId, column: &ColumnId, index: usize) -> Placement {
        let ids = self.columns.entry(column.clone()).or_default();
        let index = index.min(ids.len());
        ids.insert(index, item_id);
        Placement::new(column.clone(), index)
    }

    /// Checks the index against the live items of its board
    ///
    /// Reports problems only; nothing is repaired.
    pub fn validate<'a>(&self, items: impl IntoIterator<Item = &'a Item>) -> ValidationReport {
        let mut report = ValidationReport::default();

        let live: HashMap<&ItemId, &Item> = items
            .into_iter()
            .filter(|item| item.board_id == self.board_id)
            .map(|item| (&item.id, item))
            .collect();

        let mut seen: HashSet<&ItemId> = HashSet::new();
        for (column, ids) in &self.columns {
            for id in ids {
                if !seen.insert(id) {
                    report.duplicates.push(id.clone());
                }
                match live.get(id) {
                    None => report.orphaned.push(id.clone()),
                    Some(item) if &item.status != column => {
                        report.column_mismatches.push(ColumnMismatch {
                            item_id: id.clone(),
                            indexed_in: column.clone(),
                            item_status: item.status.clone(),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        for id in live.keys() {
            if !seen.contains(id) {
                report.missing.push((*id).clone());
            }
        }
        report.missing.sort();

        let indexed = self.len();
        if indexed != live.len() {
            report.count_mismatch = Some(CountMismatch {
                indexed,
                live: live.len(),
            });
        }

        report
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMismatch {
    pub item_id: ItemId,
    pub indexed_in: ColumnId,
    pub item_status: ColumnId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountMismatch {
    pub indexed: usize,
    pub live: usize,
}

/// Violations found by [`OrderedIndex::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub duplicates: Vec<ItemId>,
    /// Ids in the index with no live item behind them
    pub orphaned: Vec<ItemId>,
    /// Live items the index does not reference
    pub missing: Vec<ItemId>,
    pub column_mismatches: Vec<ColumnMismatch>,
    pub count_mismatch: Option<CountMismatch>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.duplicates.is_empty()
            && self.orphaned.is_empty()
            && self.missing.is_empty()
            && self.column_mismatches.is_empty()
            && self.count_mismatch.is_none()
    }
}
