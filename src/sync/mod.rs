//! Offline-tolerant queue of remote mutations, drained by a background worker.

pub mod backoff;
pub mod handle;
pub mod item;
pub mod protocol;
pub mod store;
mod worker;

pub use backoff::backoff_delay;
pub use handle::{SyncEvents, SyncHandle};
pub use item::{IndexChange, OperationType, SyncItemId, SyncOperation, SyncQueueItem};
pub use protocol::{OperationResult, ShutdownMode, SyncCommand, SyncEvent, SyncStatus};
pub use store::{FileQueueStore, QueueStore};
