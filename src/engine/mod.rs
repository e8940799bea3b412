pub mod consistency;
pub mod optimistic;

pub use consistency::{AppliedMove, BoardEvent, BoardState, ConsistencyManager, RemovedItem};
pub use optimistic::{
    CommitCallbacks, FailureNotifier, OptimisticMutator, PendingCommit, Reconciliation,
    SyncFailure,
};
