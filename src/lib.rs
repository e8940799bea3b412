//! # Kanban Sync
//!
//! Board reordering and offline synchronization engine for kanban and scrum
//! boards.
//!
//! This crate turns drag gestures into unambiguous moves, keeps each item's
//! own placement and its board's column index consistent, and replays local
//! mutations against a remote store from a background queue with retry,
//! backoff and rollback. Rendering, editing forms and the remote store itself
//! live outside of it.

pub mod config;
pub mod domain;
pub mod drag;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod sync;

// Re-export commonly used types
pub use config::{EngineConfig, SyncConfig, SyncConfigPatch};
pub use domain::{
    board::{BoardConfig, Column},
    intent::MoveIntent,
    item::{BoardId, ColumnId, Item, ItemId, ItemKind, ItemPatch},
    ordered_index::{OrderedIndex, ValidationReport},
};
pub use drag::{CollisionPolicy, DropTargetId, MoveResolver};
pub use engine::{
    BoardEvent, CommitCallbacks, ConsistencyManager, FailureNotifier, OptimisticMutator,
    Reconciliation,
};
pub use error::{KanbanError, Result};
pub use gateway::{GatewayError, RemoteGateway};
pub use sync::{ShutdownMode, SyncEvent, SyncHandle, SyncStatus};
