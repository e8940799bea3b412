use crate::domain::item::{BoardId, ColumnId};
use serde::{Deserialize, Serialize};

/// Configuration for a board column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    /// Entering this column completes the item (e.g. "done")
    #[serde(default)]
    pub terminal: bool,
}

impl Column {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: ColumnId::new(id),
            name: name.to_string(),
            terminal: false,
        }
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

/// Board configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub id: BoardId,
    pub name: String,
    pub columns: Vec<Column>,
}

impl BoardConfig {
    pub fn new(id: BoardId, name: &str, columns: Vec<Column>) -> Self {
        Self {
            id,
            name: name.to_string(),
            columns,
        }
    }

    /// Three-column task list layout
    pub fn kanban(id: BoardId) -> Self {
        Self::new(
            id,
            "Kanban",
            vec![
                Column::new("todo", "To Do"),
                Column::new("in-progress", "In Progress"),
                Column::new("done", "Done").terminal(),
            ],
        )
    }

    /// Scrum board with a product backlog column
    pub fn scrum(id: BoardId) -> Self {
        Self::new(
            id,
            "Scrum",
            vec![
                Column::new("backlog", "Backlog"),
                Column::new("todo", "Sprint To Do"),
                Column::new("in-progress", "In Progress"),
                Column::new("review", "Review"),
                Column::new("done", "Done").terminal(),
            ],
        )
    }

    /// Gets the column configuration for an id
    pub fn column(&self, id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|col| &col.id == id)
    }

    pub fn has_column(&self, id: &ColumnId) -> bool {
        self.column(id).is_some()
    }

    /// Checks if entering the column completes an item
    pub fn is_terminal(&self, id: &ColumnId) -> bool {
        self.column(id).map(|col| col.terminal).unwrap_or(false)
    }

    pub fn column_ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.columns.iter().map(|col| &col.id)
    }
}
