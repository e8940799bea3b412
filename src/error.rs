use thiserror::Error;

pub type Result<T> = std::result::Result<T, KanbanError>;

#[derive(Debug, Error)]
pub enum KanbanError {
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Board not found: {0}")]
    BoardNotFound(String),

    #[error("Column {column} does not exist on board {board}")]
    UnknownColumn { board: String, column: String },

    #[error("Item already present on board: {0}")]
    DuplicateItem(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Cannot drop here: {0}")]
    InvalidDropTarget(String),

    #[error("Sync failed, will retry: {0}")]
    TransientSyncFailure(String),

    #[error("Sync failed permanently: {0}")]
    PermanentSyncFailure(String),

    #[error("Sync worker is not running")]
    WorkerUnavailable,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl KanbanError {
    /// Errors the caller resolves locally by treating the request as "nothing happened"
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::ItemNotFound(_) | Self::InvalidDropTarget(_))
    }
}
