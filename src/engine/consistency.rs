//! The single writer of both placement representations.
//!
//! Every item's `status`/`position` and every board's [`OrderedIndex`] are
//! changed only through [`ConsistencyManager`]. Each operation finishes both
//! writes before returning and never awaits, so no observer can see the item
//! fields and the index disagree.

use crate::domain::{
    board::BoardConfig,
    intent::MoveIntent,
    item::{BoardId, ColumnId, Item, ItemId, ItemPatch},
    ordered_index::{IndexMove, OrderedIndex, Placement, ValidationReport},
    sorting::rebuild_index,
};
use crate::error::{KanbanError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 64;

/// Signals for collaborators outside the core (metrics, reporting)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardEvent {
    /// An item entered a terminal column such as "done"
    ItemCompleted {
        board_id: BoardId,
        item_id: ItemId,
        column: ColumnId,
    },
}

/// One board: its configuration, its index and its live items
#[derive(Debug, Clone)]
pub struct BoardState {
    config: BoardConfig,
    index: OrderedIndex,
    items: HashMap<ItemId, Item>,
}

impl BoardState {
    fn new(config: BoardConfig) -> Self {
        Self {
            index: OrderedIndex::new(&config),
            config,
            items: HashMap::new(),
        }
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn index(&self) -> &OrderedIndex {
        &self.index
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.items.values()
    }

    /// Items of a column in display order
    pub fn column_items(&self, column: &ColumnId) -> Vec<&Item> {
        self.index
            .column(column)
            .unwrap_or_default()
            .iter()
            .filter_map(|id| self.items.get(id))
            .collect()
    }

    pub fn validate(&self) -> ValidationReport {
        self.index.validate(self.items.values())
    }

    /// Rewrites status and dense position of every item in `column` from the index
    fn sync_column(&mut self, column: &ColumnId) {
        let Some(ids) = self.index.column(column) else {
            return;
        };
        for (position, id) in ids.iter().enumerate() {
            if let Some(item) = self.items.get_mut(id) {
                item.place(column.clone(), position);
            }
        }
    }
}

/// Outcome of [`ConsistencyManager::apply_move`]
#[derive(Debug, Clone)]
pub struct AppliedMove {
    pub board_id: BoardId,
    /// The moved item after the move
    pub item: Item,
    pub placement: IndexMove,
    /// Applying this restores the previous column and rank
    pub inverse: MoveIntent,
    /// Columns whose ranks changed, with their new id lists
    pub columns: Vec<(ColumnId, Vec<ItemId>)>,
    /// The same columns with their id lists from before the move
    pub previous_columns: Vec<(ColumnId, Vec<ItemId>)>,
}

impl AppliedMove {
    pub fn is_noop(&self) -> bool {
        self.placement.is_noop()
    }
}

/// An item taken off its board, with everything needed to put it back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedItem {
    pub item: Item,
    pub placement: Placement,
}

#[derive(Debug)]
pub struct ConsistencyManager {
    boards: HashMap<BoardId, BoardState>,
    item_boards: HashMap<ItemId, BoardId>,
    events: broadcast::Sender<BoardEvent>,
}

impl Default for ConsistencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsistencyManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            boards: HashMap::new(),
            item_boards: HashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    /// Registers a board and derives its index from the items' own fields
    ///
    /// Replaces any board with the same id. Returns the ids of items that
    /// were not loaded: those whose status is not a column of the board, and
    /// repeated ids, of which only the first copy is kept.
    pub fn load_board(&mut self, config: BoardConfig, items: Vec<Item>) -> Vec<ItemId> {
        let board_id = config.id.clone();
        if let Some(previous) = self.boards.remove(&board_id) {
            for id in previous.items.keys() {
                self.item_boards.remove(id);
            }
        }

        let rebuilt = rebuild_index(&config, &items);
        let mut board = BoardState::new(config);
        board.index = rebuilt.index;

        for item in items {
            let skipped = item.board_id != board_id
                || rebuilt.unplaced.contains(&item.id)
                || board.items.contains_key(&item.id);
            if skipped {
                continue;
            }
            self.item_boards.insert(item.id.clone(), board_id.clone());
            board.items.insert(item.id.clone(), item);
        }

        let columns: Vec<ColumnId> = board.config.column_ids().cloned().collect();
        for column in &columns {
            board.sync_column(column);
        }

        info!(board = %board_id, items = board.items.len(), "board loaded");
        self.boards.insert(board_id, board);
        let mut skipped = rebuilt.unplaced;
        skipped.extend(rebuilt.duplicates);
        skipped
    }

    pub fn board(&self, id: &BoardId) -> Option<&BoardState> {
        self.boards.get(id)
    }

    pub fn boards(&self) -> impl Iterator<Item = &BoardState> {
        self.boards.values()
    }

    pub fn item(&self, id: &ItemId) -> Option<&Item> {
        let board_id = self.item_boards.get(id)?;
        self.boards.get(board_id)?.item(id)
    }

    /// Board that currently owns the item
    pub fn board_of(&self, id: &ItemId) -> Option<&BoardId> {
        self.item_boards.get(id)
    }

    pub fn validate(&self, board_id: &BoardId) -> Result<ValidationReport> {
        self.boards
            .get(board_id)
            .map(BoardState::validate)
            .ok_or_else(|| KanbanError::BoardNotFound(board_id.to_string()))
    }

    fn owning_board_mut(&mut self, item_id: &ItemId) -> Result<&mut BoardState> {
        let board_id = self
            .item_boards
            .get(item_id)
            .ok_or_else(|| KanbanError::ItemNotFound(item_id.to_string()))?;
        self.boards
            .get_mut(board_id)
            .ok_or_else(|| KanbanError::BoardNotFound(board_id.to_string()))
    }

    /// Applies a move to the index and the item fields as one unit
    ///
    /// `ItemNotFound` means the item vanished mid-drag; nothing was changed.
    pub fn apply_move(&mut self, intent: &MoveIntent) -> Result<AppliedMove> {
        let board = self.owning_board_mut(&intent.item_id)?;
        let item = board
            .items
            .get(&intent.item_id)
            .ok_or_else(|| KanbanError::ItemNotFound(intent.item_id.to_string()))?;
        let fallback = Placement::new(item.status.clone(), item.position);

        let (next, placement) = board.index.moved(
            &intent.item_id,
            &intent.source_column,
            &intent.target_column,
            intent.target_index,
        )?;

        let previous = placement.previous.clone().unwrap_or(fallback);
        let mut touched = vec![placement.placed.column.clone()];
        if previous.column != placement.placed.column {
            touched.push(previous.column.clone());
        }
        let previous_columns = touched
            .iter()
            .map(|column| {
                let ids = board.index.column(column).unwrap_or_default().to_vec();
                (column.clone(), ids)
            })
            .collect();

        board.index = next;
        for column in &touched {
            board.sync_column(column);
        }

        let board_id = board.config.id.clone();
        let completed = previous.column != placement.placed.column
            && board.config.is_terminal(&placement.placed.column);
        let columns = touched
            .iter()
            .map(|column| {
                let ids = board.index.column(column).unwrap_or_default().to_vec();
                (column.clone(), ids)
            })
            .collect();
        let item = board
            .items
            .get(&intent.item_id)
            .cloned()
            .ok_or_else(|| KanbanError::ItemNotFound(intent.item_id.to_string()))?;

        let inverse = MoveIntent::new(
            intent.item_id.clone(),
            placement.placed.column.clone(),
            previous.column,
            previous.index,
        );

        if completed {
            debug!(item = %intent.item_id, column = %placement.placed.column, "item completed");
            // No subscribers is fine.
            let _ = self.events.send(BoardEvent::ItemCompleted {
                board_id: board_id.clone(),
                item_id: intent.item_id.clone(),
                column: placement.placed.column.clone(),
            });
        }

        Ok(AppliedMove {
            board_id,
            item,
            placement,
            inverse,
            columns,
            previous_columns,
        })
    }

    /// Adds a new item to its board at `index` (end of column when `None`)
    pub fn insert_item(&mut self, item: Item, index: Option<usize>) -> Result<Item> {
        if self.item_boards.contains_key(&item.id) {
            return Err(KanbanError::DuplicateItem(item.id.to_string()));
        }
        let board = self
            .boards
            .get_mut(&item.board_id)
            .ok_or_else(|| KanbanError::BoardNotFound(item.board_id.to_string()))?;

        let column = item.status.clone();
        let at = index.unwrap_or(usize::MAX);
        board.index.insert(item.id.clone(), &column, at)?;

        let id = item.id.clone();
        let board_id = item.board_id.clone();
        board.items.insert(id.clone(), item);
        board.sync_column(&column);

        let stored = board
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| KanbanError::ItemNotFound(id.to_string()))?;
        self.item_boards.insert(id, board_id);
        Ok(stored)
    }

    /// Takes an item off its board
    pub fn remove_item(&mut self, item_id: &ItemId) -> Result<RemovedItem> {
        let board = self.owning_board_mut(item_id)?;
        let placement = board
            .index
            .remove(item_id)
            .ok_or_else(|| KanbanError::ItemNotFound(item_id.to_string()))?;
        let item = board
            .items
            .remove(item_id)
            .ok_or_else(|| KanbanError::ItemNotFound(item_id.to_string()))?;
        board.sync_column(&placement.column);
        self.item_boards.remove(item_id);

        debug!(item = %item_id, column = %placement.column, index = placement.index, "item removed");
        Ok(RemovedItem { item, placement })
    }

    /// Puts a removed item back at its former column and rank
    pub fn restore_item(&mut self, removed: RemovedItem) -> Result<Item> {
        let RemovedItem { mut item, placement } = removed;
        item.status = placement.column;
        self.insert_item(item, Some(placement.index))
    }

    /// Edits an item's fields; returns the updated item and the patch that undoes the edit
    pub fn update_item(&mut self, item_id: &ItemId, patch: &ItemPatch) -> Result<(Item, ItemPatch)> {
        let board = self.owning_board_mut(item_id)?;
        let item = board
            .items
            .get_mut(item_id)
            .ok_or_else(|| KanbanError::ItemNotFound(item_id.to_string()))?;
        let inverse = item.apply_patch(patch);
        Ok((item.clone(), inverse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(id: &str) -> ColumnId {
        ColumnId::new(id)
    }

    fn board_id() -> BoardId {
        BoardId::new("b1")
    }

    fn item(id: &str, status: &str, position: usize) -> Item {
        let mut item = Item::with_id(ItemId::new(id), board_id(), col(status), id);
        item.position = position;
        item
    }

    fn manager() -> ConsistencyManager {
        let mut manager = ConsistencyManager::new();
        let items = vec![
            item("t0", "todo", 0),
            item("t1", "todo", 1),
            item("x", "todo", 2),
            item("t3", "todo", 3),
            item("t4", "todo", 4),
            item("d0", "done", 0),
            item("d1", "done", 1),
        ];
        manager.load_board(BoardConfig::kanban(board_id()), items);
        manager
    }

    fn column(manager: &ConsistencyManager, column: &str) -> Vec<String> {
        manager
            .board(&board_id())
            .unwrap()
            .index()
            .column(&col(column))
            .unwrap()
            .iter()
            .map(|id| id.to_string())
            .collect()
    }

    fn assert_consistent(manager: &ConsistencyManager) {
        let board = manager.board(&board_id()).unwrap();
        let report = board.validate();
        assert!(report.is_valid(), "{report:?}");
        for (column, ids) in board.index().columns() {
            for (position, id) in ids.iter().enumerate() {
                let item = board.item(id).unwrap();
                assert_eq!(&item.status, column);
                assert_eq!(item.position, position);
            }
        }
    }

    #[test]
    fn test_move_to_done_updates_both_representations() {
        let mut manager = manager();
        let intent = MoveIntent::new(ItemId::new("x"), col("todo"), col("done"), 0);

        let applied = manager.apply_move(&intent).unwrap();

        assert_eq!(column(&manager, "todo"), vec!["t0", "t1", "t3", "t4"]);
        assert_eq!(column(&manager, "done"), vec!["x", "d0", "d1"]);
        assert_eq!(applied.item.status, col("done"));
        assert_eq!(applied.item.position, 0);
        assert_eq!(
            applied.inverse,
            MoveIntent::new(ItemId::new("x"), col("done"), col("todo"), 2)
        );
        assert_eq!(applied.columns.len(), 2);
        let before: Vec<(String, usize)> = applied
            .previous_columns
            .iter()
            .map(|(column, ids)| (column.to_string(), ids.len()))
            .collect();
        assert_eq!(before, vec![("done".to_string(), 2), ("todo".to_string(), 5)]);
        assert_consistent(&manager);
    }

    #[test]
    fn test_inverse_restores_exact_state() {
        let mut manager = manager();
        let before: Vec<Item> = {
            let mut items: Vec<Item> = manager.board(&board_id()).unwrap().items().cloned().collect();
            items.sort_by(|a, b| a.id.cmp(&b.id));
            items
        };
        let index_before = manager.board(&board_id()).unwrap().index().clone();

        let applied = manager
            .apply_move(&MoveIntent::new(ItemId::new("t1"), col("todo"), col("done"), 1))
            .unwrap();
        manager.apply_move(&applied.inverse).unwrap();

        let board = manager.board(&board_id()).unwrap();
        assert_eq!(board.index(), &index_before);
        let mut after: Vec<Item> = board.items().cloned().collect();
        after.sort_by(|a, b| a.id.cmp(&b.id));
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.status, b.status);
            assert_eq!(a.position, b.position);
        }
    }

    #[test]
    fn test_missing_item_is_reported_without_mutation() {
        let mut manager = manager();
        let index_before = manager.board(&board_id()).unwrap().index().clone();

        let err = manager
            .apply_move(&MoveIntent::new(ItemId::new("gone"), col("todo"), col("done"), 0))
            .unwrap_err();

        assert!(matches!(err, KanbanError::ItemNotFound(_)));
        assert!(err.is_benign());
        assert_eq!(manager.board(&board_id()).unwrap().index(), &index_before);
    }

    #[test]
    fn test_unknown_target_column_leaves_state_untouched() {
        let mut manager = manager();
        let result = manager.apply_move(&MoveIntent::new(
            ItemId::new("x"),
            col("todo"),
            col("archive"),
            0,
        ));

        assert!(matches!(result, Err(KanbanError::UnknownColumn { .. })));
        assert_eq!(manager.item(&ItemId::new("x")).unwrap().status, col("todo"));
        assert_consistent(&manager);
    }

    #[test]
    fn test_completion_event_on_terminal_column() {
        let mut manager = manager();
        let mut events = manager.subscribe();

        manager
            .apply_move(&MoveIntent::new(ItemId::new("t0"), col("todo"), col("in-progress"), 0))
            .unwrap();
        assert!(events.try_recv().is_err());

        manager
            .apply_move(&MoveIntent::new(ItemId::new("t0"), col("in-progress"), col("done"), 5))
            .unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            BoardEvent::ItemCompleted {
                board_id: board_id(),
                item_id: ItemId::new("t0"),
                column: col("done"),
            }
        );

        // Reordering inside "done" is not a completion.
        manager
            .apply_move(&MoveIntent::new(ItemId::new("t0"), col("done"), col("done"), 0))
            .unwrap();
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_stale_source_does_not_duplicate() {
        let mut manager = manager();
        let intent = MoveIntent::new(ItemId::new("x"), col("todo"), col("done"), 0);
        manager.apply_move(&intent).unwrap();
        manager.apply_move(&intent).unwrap();

        assert_eq!(column(&manager, "done"), vec!["x", "d0", "d1"]);
        assert_consistent(&manager);
    }

    #[test]
    fn test_remove_and_restore_item() {
        let mut manager = manager();
        let removed = manager.remove_item(&ItemId::new("t1")).unwrap();

        assert_eq!(removed.placement, Placement::new(col("todo"), 1));
        assert!(manager.item(&ItemId::new("t1")).is_none());
        assert_eq!(column(&manager, "todo"), vec!["t0", "x", "t3", "t4"]);
        assert_consistent(&manager);

        manager.restore_item(removed).unwrap();
        assert_eq!(column(&manager, "todo"), vec!["t0", "t1", "x", "t3", "t4"]);
        assert_consistent(&manager);
    }

    #[test]
    fn test_insert_item_appends_by_default() {
        let mut manager = manager();
        let new = Item::with_id(ItemId::new("n"), board_id(), col("done"), "new");

        let stored = manager.insert_item(new.clone(), None).unwrap();
        assert_eq!(stored.position, 2);
        assert!(matches!(
            manager.insert_item(new, None),
            Err(KanbanError::DuplicateItem(_))
        ));
        assert_consistent(&manager);
    }

    #[test]
    fn test_insert_item_on_unknown_board() {
        let mut manager = manager();
        let stray = Item::with_id(ItemId::new("s"), BoardId::new("nope"), col("todo"), "s");
        assert!(matches!(
            manager.insert_item(stray, None),
            Err(KanbanError::BoardNotFound(_))
        ));
    }

    #[test]
    fn test_update_item_returns_inverse_patch() {
        let mut manager = manager();
        let (updated, inverse) = manager
            .update_item(&ItemId::new("x"), &ItemPatch::title("Renamed"))
            .unwrap();
        assert_eq!(updated.title, "Renamed");

        manager.update_item(&ItemId::new("x"), &inverse).unwrap();
        assert_eq!(manager.item(&ItemId::new("x")).unwrap().title, "x");
    }

    #[test]
    fn test_load_board_skips_unknown_status_and_densifies() {
        let mut manager = ConsistencyManager::new();
        let unplaced = manager.load_board(
            BoardConfig::kanban(board_id()),
            vec![item("a", "todo", 7), item("b", "todo", 3), item("z", "archived", 0)],
        );

        assert_eq!(unplaced, vec![ItemId::new("z")]);
        assert_eq!(column(&manager, "todo"), vec!["b", "a"]);
        assert_eq!(manager.item(&ItemId::new("b")).unwrap().position, 0);
        assert_eq!(manager.item(&ItemId::new("a")).unwrap().position, 1);
        assert!(manager.item(&ItemId::new("z")).is_none());
        assert_consistent(&manager);
    }

    #[test]
    fn test_load_board_keeps_one_copy_of_repeated_id() {
        let mut manager = ConsistencyManager::new();
        let skipped = manager.load_board(
            BoardConfig::kanban(board_id()),
            vec![item("a", "todo", 0), item("b", "todo", 1), item("a", "done", 0)],
        );

        assert_eq!(skipped, vec![ItemId::new("a")]);
        assert_eq!(column(&manager, "todo"), vec!["a", "b"]);
        assert!(column(&manager, "done").is_empty());
        assert_eq!(manager.item(&ItemId::new("a")).unwrap().status, col("todo"));
        assert_consistent(&manager);
    }
}
