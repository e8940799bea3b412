use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Opaque unique identifier for a board item
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Creates an ItemId from an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ItemId {
    type Err = crate::error::KanbanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.contains(crate::drag::target::TARGET_SEPARATOR) {
            return Err(crate::error::KanbanError::InvalidId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a board
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoardId(String);

impl BoardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a board column, which doubles as the item status
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(String);

impl ColumnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ColumnId {
    type Err = crate::error::KanbanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.contains(crate::drag::target::TARGET_SEPARATOR) {
            return Err(crate::error::KanbanError::InvalidId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of work item shown on a board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Task,
    UserStory,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => write!(f, "Task"),
            Self::UserStory => write!(f, "User Story"),
        }
    }
}

/// A task or user story living in exactly one column of one board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub board_id: BoardId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub kind: ItemKind,
    pub status: ColumnId,
    pub position: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Creates a new item with a generated id, placed at the top of `status`
    pub fn new(board_id: BoardId, status: ColumnId, title: impl Into<String>) -> Self {
        Self::with_id(ItemId::generate(), board_id, status, title)
    }

    /// Creates a new item with a caller-supplied id
    pub fn with_id(
        id: ItemId,
        board_id: BoardId,
        status: ColumnId,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            board_id,
            title: title.into(),
            description: None,
            kind: ItemKind::Task,
            status,
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_kind(mut self, kind: ItemKind) -> Self {
        self.kind = kind;
        self
    }

    /// Records a new placement. Only the consistency layer calls this.
    pub(crate) fn place(&mut self, status: ColumnId, position: usize) {
        if self.status != status || self.position != position {
            self.status = status;
            self.position = position;
            self.updated_at = Utc::now();
        }
    }

    /// Applies the editable fields of a patch and returns the patch that undoes it
    pub(crate) fn apply_patch(&mut self, patch: &ItemPatch) -> ItemPatch {
        let mut previous = ItemPatch::default();

        if let Some(title) = &patch.title {
            previous.title = Some(std::mem::replace(&mut self.title, title.clone()));
        }
        if let Some(description) = &patch.description {
            previous.description = Some(std::mem::replace(
                &mut self.description,
                description.clone(),
            ));
        }
        if let Some(kind) = patch.kind {
            previous.kind = Some(std::mem::replace(&mut self.kind, kind));
        }

        if !patch.is_empty() {
            self.updated_at = Utc::now();
        }
        previous
    }
}

/// Partial update of an item's editable fields
///
/// Placement (`status`/`position`) is not patchable; it only changes through a move.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_or_null"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
}

impl ItemPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn description(description: Option<String>) -> Self {
        Self {
            description: Some(description),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.kind.is_none()
    }
}

// Keeps an explicit `null` as `Some(None)` ("clear the field") instead of "untouched".
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
