pub mod board;
pub mod intent;
pub mod item;
pub mod ordered_index;
pub mod sorting;

pub use board::{BoardConfig, Column};
pub use intent::MoveIntent;
pub use item::{BoardId, ColumnId, Item, ItemId, ItemKind, ItemPatch};
pub use ordered_index::{IndexMove, OrderedIndex, Placement, ValidationReport};
pub use sorting::{rebuild_index, sort_items, SortField, SortOrder};
