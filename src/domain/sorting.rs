use crate::domain::{
    board::BoardConfig,
    item::{ColumnId, Item, ItemId},
    ordered_index::OrderedIndex,
};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use tracing::warn;

/// Fields available for sorting items inside a column view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Position,
    Title,
    Created,
    Updated,
}

/// Sort order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "position" => Ok(SortField::Position),
            "title" => Ok(SortField::Title),
            "created" => Ok(SortField::Created),
            "updated" => Ok(SortField::Updated),
            _ => Err(format!(
                "Invalid sort field '{}'. Valid fields: position, title, created, updated",
                s
            )),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(SortOrder::Ascending),
            "desc" => Ok(SortOrder::Descending),
            _ => Err(format!(
                "Invalid sort order '{}'. Valid orders: asc, desc",
                s
            )),
        }
    }
}

/// Sorts items in-place; the sort is stable, so equal keys keep their input order
pub fn sort_items(items: &mut [Item], field: SortField, order: SortOrder) {
    items.sort_by(|a, b| {
        let cmp = match field {
            SortField::Position => compare_rank(a, b),
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortField::Created => a.created_at.cmp(&b.created_at),
            SortField::Updated => a.updated_at.cmp(&b.updated_at),
        };

        match order {
            SortOrder::Ascending => cmp,
            SortOrder::Descending => cmp.reverse(),
        }
    });
}

/// Position first, then creation time
fn compare_rank(a: &Item, b: &Item) -> Ordering {
    a.position
        .cmp(&b.position)
        .then_with(|| a.created_at.cmp(&b.created_at))
}

/// Outcome of deriving an index from item fields
#[derive(Debug, Clone)]
pub struct RebuiltIndex {
    pub index: OrderedIndex,
    /// Items whose status names no column of the board
    pub unplaced: Vec<ItemId>,
    /// Ids supplied more than once; only the first copy was indexed
    pub duplicates: Vec<ItemId>,
}

/// Derives a board index from each item's `status` and `position`
///
/// Ties on position fall back to `created_at` and then to the order the
/// items were supplied in. Items of other boards are ignored; items with an
/// unknown status are reported rather than guessed into a column. When an
/// id appears more than once the first copy wins and the id is reported.
pub fn rebuild_index<'a>(
    config: &BoardConfig,
    items: impl IntoIterator<Item = &'a Item>,
) -> RebuiltIndex {
    let mut grouped: BTreeMap<ColumnId, Vec<&Item>> = config
        .column_ids()
        .map(|id| (id.clone(), Vec::new()))
        .collect();
    let mut unplaced = Vec::new();
    let mut duplicates = Vec::new();
    let mut seen = HashSet::new();

    for item in items.into_iter().filter(|item| item.board_id == config.id) {
        if !seen.insert(&item.id) {
            warn!(item = %item.id, board = %config.id, "duplicate item id, keeping the first copy");
            duplicates.push(item.id.clone());
            continue;
        }
        match grouped.get_mut(&item.status) {
            Some(bucket) => bucket.push(item),
            None => {
                warn!(
                    item = %item.id,
                    status = %item.status,
                    board = %config.id,
                    "item status is not a column of its board"
                );
                unplaced.push(item.id.clone());
            }
        }
    }

    let columns = grouped
        .into_iter()
        .map(|(column, mut bucket)| {
            bucket.sort_by(|a, b| compare_rank(a, b));
            (column, bucket.into_iter().map(|item| item.id.clone()).collect())
        })
        .collect();

    RebuiltIndex {
        index: OrderedIndex::from_columns(config.id.clone(), columns),
        unplaced,
        duplicates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::BoardId;
    use chrono::{Duration, Utc};

    fn item(id: &str, status: &str, position: usize) -> Item {
        let mut item = Item::with_id(
            ItemId::new(id),
            BoardId::new("b1"),
            ColumnId::new(status),
            id.to_uppercase(),
        );
        item.position = position;
        item
    }

    #[test]
    fn test_sort_items_by_title_case_insensitive() {
        let mut items = vec![item("zebra", "todo", 0), item("Apple", "todo", 1), item("banana", "todo", 2)];
        items[0].title = "zebra".to_string();
        items[1].title = "Apple".to_string();
        items[2].title = "BANANA".to_string();

        sort_items(&mut items, SortField::Title, SortOrder::Ascending);

        assert_eq!(items[0].title, "Apple");
        assert_eq!(items[1].title, "BANANA");
        assert_eq!(items[2].title, "zebra");
    }

    #[test]
    fn test_sort_items_by_position_descending() {
        let mut items = vec![item("a", "todo", 1), item("b", "todo", 0), item("c", "todo", 2)];

        sort_items(&mut items, SortField::Position, SortOrder::Descending);

        let order: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_parse_sort_options() {
        assert_eq!(SortField::from_str("Position"), Ok(SortField::Position));
        assert_eq!(SortOrder::from_str("desc"), Ok(SortOrder::Descending));
        assert!(SortField::from_str("points").is_err());
    }

    #[test]
    fn test_rebuild_index_orders_by_position() {
        let config = BoardConfig::kanban(BoardId::new("b1"));
        let items = vec![
            item("c", "todo", 2),
            item("a", "todo", 0),
            item("x", "done", 0),
            item("b", "todo", 1),
        ];

        let rebuilt = rebuild_index(&config, &items);
        let todo: Vec<&str> = rebuilt
            .index
            .column(&ColumnId::new("todo"))
            .unwrap()
            .iter()
            .map(|id| id.as_str())
            .collect();

        assert_eq!(todo, vec!["a", "b", "c"]);
        assert!(rebuilt.index.column(&ColumnId::new("in-progress")).unwrap().is_empty());
        assert!(rebuilt.unplaced.is_empty());
        assert!(rebuilt.index.validate(&items).is_valid());
    }

    #[test]
    fn test_rebuild_index_breaks_ties_by_creation_then_input_order() {
        let config = BoardConfig::kanban(BoardId::new("b1"));
        let now = Utc::now();

        let mut late = item("late", "todo", 0);
        late.created_at = now + Duration::seconds(5);
        let mut early = item("early", "todo", 0);
        early.created_at = now;
        let mut first = item("first", "todo", 1);
        first.created_at = now;
        let mut second = item("second", "todo", 1);
        second.created_at = now;

        let items = vec![late, early, first, second];
        let rebuilt = rebuild_index(&config, &items);
        let todo: Vec<&str> = rebuilt
            .index
            .column(&ColumnId::new("todo"))
            .unwrap()
            .iter()
            .map(|id| id.as_str())
            .collect();

        assert_eq!(todo, vec!["early", "late", "first", "second"]);
    }

    #[test]
    fn test_rebuild_index_reports_unknown_status() {
        let config = BoardConfig::kanban(BoardId::new("b1"));
        let items = vec![item("a", "todo", 0), item("lost", "archived", 0)];

        let rebuilt = rebuild_index(&config, &items);
        assert_eq!(rebuilt.unplaced, vec![ItemId::new("lost")]);
        assert_eq!(rebuilt.index.len(), 1);
    }

    #[test]
    fn test_rebuild_index_keeps_first_copy_of_duplicate_id() {
        let config = BoardConfig::kanban(BoardId::new("b1"));
        let items = vec![item("a", "todo", 0), item("b", "todo", 1), item("a", "done", 0)];

        let rebuilt = rebuild_index(&config, &items);
        assert_eq!(rebuilt.duplicates, vec![ItemId::new("a")]);
        assert_eq!(rebuilt.index.len(), 2);
        assert!(rebuilt.index.column(&ColumnId::new("done")).unwrap().is_empty());
    }
}
