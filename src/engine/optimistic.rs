//! Local-first mutations with rollback on permanent sync failure.
//!
//! Each commit changes the board through [`ConsistencyManager`] right away,
//! queues the matching remote operation and remembers how to undo itself.
//! Worker events are matched back to commits by [`SyncItemId`].
//!
//! A commit computed on top of another unsettled commit (same item, or a
//! board column both rewrite) is held back until that one settles. If the
//! earlier commit is rejected, the held ones are rolled back with it, newest
//! first, and never reach the remote store.

use crate::config::SyncConfigPatch;
use crate::domain::{BoardConfig, BoardId, ColumnId, Item, ItemId, ItemPatch, MoveIntent};
use crate::engine::consistency::{ConsistencyManager, RemovedItem};
use crate::error::{KanbanError, Result};
use crate::gateway::{GatewayError, ItemUpdate};
use crate::sync::{
    IndexChange, OperationResult, OperationType, ShutdownMode, SyncEvent, SyncEvents, SyncHandle,
    SyncItemId, SyncOperation, SyncQueueItem, SyncStatus,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A permanent sync failure as shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailure {
    pub sync_id: SyncItemId,
    /// `None` for operations restored from an earlier session
    pub item_id: Option<ItemId>,
    pub operation: Option<OperationType>,
    pub error: GatewayError,
    pub attempts: u32,
}

impl From<SyncFailure> for KanbanError {
    fn from(failure: SyncFailure) -> Self {
        let subject = failure
            .item_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| failure.sync_id.to_string());
        KanbanError::PermanentSyncFailure(format!(
            "{} after {} attempt(s): {}",
            subject, failure.attempts, failure.error
        ))
    }
}

/// Receives permanent sync failures, e.g. to show a toast
pub trait FailureNotifier: Send + Sync {
    fn notify_failure(&self, failure: &SyncFailure);
}

type SuccessCallback = Box<dyn FnOnce(&OperationResult) + Send>;
type FailureCallback = Box<dyn FnOnce(&GatewayError) + Send>;

/// Callbacks bound to a single commit; at most one of them runs
#[derive(Default)]
pub struct CommitCallbacks {
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl CommitCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, callback: impl FnOnce(&OperationResult) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(callback));
        self
    }

    /// Runs after the commit has been rolled back
    pub fn on_failure(mut self, callback: impl FnOnce(&GatewayError) + Send + 'static) -> Self {
        self.on_failure = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for CommitCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Rollback {
    Move(MoveIntent),
    Create(ItemId),
    Delete(RemovedItem),
    Update { item_id: ItemId, inverse: ItemPatch },
}

#[derive(Debug)]
enum Stage {
    /// Handed to the worker
    Queued,
    /// Waiting for the listed commits to settle
    Held(HashSet<SyncItemId>),
}

/// A commit whose remote operation has not settled yet
#[derive(Debug)]
pub struct PendingCommit {
    pub item_id: ItemId,
    pub operation: OperationType,
    sequence: u64,
    request: SyncQueueItem,
    stage: Stage,
    /// Cleared from the queue; never sent once released
    abandoned: bool,
    rollback: Rollback,
    callbacks: CommitCallbacks,
}

impl PendingCommit {
    /// Still waiting for earlier commits before it can be sent
    pub fn is_held(&self) -> bool {
        matches!(self.stage, Stage::Held(_))
    }
}

/// What a worker event meant for the local state
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Confirmed {
        sync_id: SyncItemId,
        item_id: ItemId,
    },
    RolledBack {
        sync_id: SyncItemId,
        item_id: ItemId,
        error: GatewayError,
        /// Held commits rolled back with it, newest first
        cascaded: Vec<SyncItemId>,
    },
    Retrying {
        sync_id: SyncItemId,
        attempts: u32,
        error: GatewayError,
    },
    StatusChanged(SyncStatus),
    /// Commits dropped by a queue clear; their local changes stay
    Abandoned(Vec<SyncItemId>),
    /// Outcome of an operation no local commit is waiting for
    Untracked(SyncItemId),
}

pub struct OptimisticMutator {
    state: ConsistencyManager,
    sync: SyncHandle,
    events: SyncEvents,
    pending: HashMap<SyncItemId, PendingCommit>,
    sequence: u64,
    status: SyncStatus,
    notifier: Option<Arc<dyn FailureNotifier>>,
}

impl OptimisticMutator {
    pub fn new(state: ConsistencyManager, sync: SyncHandle, events: SyncEvents) -> Self {
        Self {
            state,
            sync,
            events,
            pending: HashMap::new(),
            sequence: 0,
            status: SyncStatus::default(),
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn FailureNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The visible board state
    pub fn state(&self) -> &ConsistencyManager {
        &self.state
    }

    /// Latest snapshot reported by the worker
    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn pending(&self) -> impl Iterator<Item = (&SyncItemId, &PendingCommit)> {
        self.pending.iter()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, sync_id: &SyncItemId) -> bool {
        self.pending.contains_key(sync_id)
    }

    pub fn is_held(&self, sync_id: &SyncItemId) -> bool {
        self.pending.get(sync_id).is_some_and(PendingCommit::is_held)
    }

    pub fn load_board(&mut self, config: BoardConfig, items: Vec<Item>) -> Vec<ItemId> {
        self.state.load_board(config, items)
    }

    fn column_ids(&self, board_id: &BoardId, column: &ColumnId) -> Vec<ItemId> {
        self.state
            .board(board_id)
            .and_then(|board| board.index().column(column))
            .map(<[ItemId]>::to_vec)
            .unwrap_or_default()
    }

    /// Applies a move locally and queues it as one combined reorder
    ///
    /// Returns `None` when the move changes nothing; nothing is queued then.
    pub fn commit_move(
        &mut self,
        intent: &MoveIntent,
        callbacks: CommitCallbacks,
    ) -> Result<Option<SyncItemId>> {
        let applied = self.state.apply_move(intent)?;
        if applied.is_noop() {
            debug!(item = %intent.item_id, "move is a no-op, nothing to sync");
            return Ok(None);
        }

        let index = applied
            .columns
            .into_iter()
            .zip(applied.previous_columns)
            .fold(
                IndexChange::new(applied.board_id),
                |index, ((column, current), (_, previous))| index.column(column, previous, current),
            );
        let operation = SyncOperation::Reorder {
            item_id: applied.item.id.clone(),
            changes: ItemUpdate::placement(applied.item.status.clone(), applied.item.position),
            index,
        };
        self.submit(operation, Rollback::Move(applied.inverse), callbacks)
            .map(Some)
    }

    /// Adds an item locally (at the end of its column when `index` is `None`) and queues its creation
    pub fn commit_create(
        &mut self,
        item: Item,
        index: Option<usize>,
        callbacks: CommitCallbacks,
    ) -> Result<SyncItemId> {
        let stored = self.state.insert_item(item, index)?;
        let current = self.column_ids(&stored.board_id, &stored.status);
        let previous = current
            .iter()
            .filter(|id| **id != stored.id)
            .cloned()
            .collect();
        let change = IndexChange::new(stored.board_id.clone()).column(
            stored.status.clone(),
            previous,
            current,
        );

        let rollback = Rollback::Create(stored.id.clone());
        let operation = SyncOperation::Create {
            item: stored,
            index: Some(change),
        };
        self.submit(operation, rollback, callbacks)
    }

    pub fn commit_delete(
        &mut self,
        item_id: &ItemId,
        callbacks: CommitCallbacks,
    ) -> Result<SyncItemId> {
        let removed = self.state.remove_item(item_id)?;
        let column = removed.placement.column.clone();
        let current = self.column_ids(&removed.item.board_id, &column);
        let mut previous = current.clone();
        previous.insert(removed.placement.index.min(previous.len()), item_id.clone());

        let operation = SyncOperation::Delete {
            item_id: item_id.clone(),
            index: Some(IndexChange::new(removed.item.board_id.clone()).column(
                column, previous, current,
            )),
        };
        self.submit(operation, Rollback::Delete(removed), callbacks)
    }

    /// Edits item fields locally and queues the change; `None` for an empty patch
    pub fn commit_update(
        &mut self,
        item_id: &ItemId,
        patch: ItemPatch,
        callbacks: CommitCallbacks,
    ) -> Result<Option<SyncItemId>> {
        if patch.is_empty() {
            return Ok(None);
        }
        let (_, inverse) = self.state.update_item(item_id, &patch)?;
        let operation = SyncOperation::Update {
            item_id: item_id.clone(),
            changes: ItemUpdate::fields(patch),
        };
        let rollback = Rollback::Update {
            item_id: item_id.clone(),
            inverse,
        };
        self.submit(operation, rollback, callbacks).map(Some)
    }

    fn submit(
        &mut self,
        operation: SyncOperation,
        rollback: Rollback,
        callbacks: CommitCallbacks,
    ) -> Result<SyncItemId> {
        let request = SyncQueueItem::new(operation);
        let sync_id = request.id;
        let item_id = request.operation.item_id().clone();
        let operation_type = request.operation_type();

        let waiting_on: HashSet<SyncItemId> = self
            .pending
            .iter()
            .filter(|(_, commit)| request.operation.depends_on(&commit.request.operation))
            .map(|(id, _)| *id)
            .collect();

        let stage = if waiting_on.is_empty() {
            if let Err(err) = self.sync.enqueue_item(request.clone()) {
                warn!(item = %item_id, operation = %operation_type, "sync worker unavailable, undoing commit");
                self.undo(&item_id, rollback);
                return Err(err);
            }
            debug!(%sync_id, item = %item_id, operation = %operation_type, "commit queued");
            Stage::Queued
        } else {
            debug!(%sync_id, item = %item_id, waiting = waiting_on.len(), "commit held until earlier commits settle");
            Stage::Held(waiting_on)
        };

        self.sequence += 1;
        self.pending.insert(
            sync_id,
            PendingCommit {
                item_id,
                operation: operation_type,
                sequence: self.sequence,
                request,
                stage,
                abandoned: false,
                rollback,
                callbacks,
            },
        );
        Ok(sync_id)
    }

    fn undo(&mut self, item_id: &ItemId, rollback: Rollback) {
        let outcome = match rollback {
            Rollback::Move(inverse) => self.state.apply_move(&inverse).map(|_| ()),
            Rollback::Create(id) => self.state.remove_item(&id).map(|_| ()),
            Rollback::Delete(removed) => self.state.restore_item(removed).map(|_| ()),
            Rollback::Update { item_id, inverse } => {
                self.state.update_item(&item_id, &inverse).map(|_| ())
            }
        };
        if let Err(err) = outcome {
            warn!(item = %item_id, error = %err, "rollback could not be applied");
        }
    }

    /// Hands held commits to the worker once nothing they wait for is pending
    fn release(&mut self, settled: &SyncItemId) {
        let mut ready: Vec<(u64, SyncItemId)> = Vec::new();
        for (id, commit) in self.pending.iter_mut() {
            if let Stage::Held(waiting_on) = &mut commit.stage {
                if waiting_on.remove(settled) && waiting_on.is_empty() {
                    ready.push((commit.sequence, *id));
                }
            }
        }
        ready.sort_by_key(|(sequence, _)| *sequence);
        for (_, sync_id) in ready {
            self.dispatch(sync_id);
        }
    }

    fn dispatch(&mut self, sync_id: SyncItemId) {
        let Some(commit) = self.pending.get_mut(&sync_id) else {
            return;
        };
        if commit.abandoned {
            debug!(%sync_id, item = %commit.item_id, "held commit dropped by queue clear");
            self.pending.remove(&sync_id);
            self.release(&sync_id);
            return;
        }

        match self.sync.enqueue_item(commit.request.clone()) {
            Ok(_) => {
                debug!(%sync_id, item = %commit.item_id, "held commit released");
                commit.stage = Stage::Queued;
            }
            Err(err) => {
                warn!(%sync_id, error = %err, "sync worker unavailable, undoing held commit");
                self.roll_back(sync_id, GatewayError::Network(err.to_string()), 0);
            }
        }
    }

    /// Rolls back a commit together with every held commit computed on top of it
    fn roll_back(&mut self, sync_id: SyncItemId, error: GatewayError, attempts: u32) -> Reconciliation {
        let mut doomed = HashSet::from([sync_id]);
        loop {
            let found: Vec<SyncItemId> = self
                .pending
                .iter()
                .filter(|(id, commit)| match &commit.stage {
                    Stage::Held(waiting_on) => {
                        !doomed.contains(*id) && !waiting_on.is_disjoint(&doomed)
                    }
                    Stage::Queued => false,
                })
                .map(|(id, _)| *id)
                .collect();
            if found.is_empty() {
                break;
            }
            doomed.extend(found);
        }

        let mut dependents: Vec<(u64, SyncItemId)> = doomed
            .iter()
            .filter(|id| **id != sync_id)
            .filter_map(|id| self.pending.get(id).map(|commit| (commit.sequence, *id)))
            .collect();
        dependents.sort_by(|a, b| b.0.cmp(&a.0));

        let mut cascaded = Vec::with_capacity(dependents.len());
        for (_, id) in dependents {
            let Some(commit) = self.pending.remove(&id) else {
                continue;
            };
            warn!(sync_id = %id, item = %commit.item_id, cause = %sync_id, "rolling back commit built on a rejected one");
            self.undo(&commit.item_id, commit.rollback);
            if let Some(callback) = commit.callbacks.on_failure {
                callback(&error);
            }
            cascaded.push(id);
        }

        let Some(commit) = self.pending.remove(&sync_id) else {
            return Reconciliation::Untracked(sync_id);
        };
        error!(%sync_id, item = %commit.item_id, operation = %commit.operation, error = %error, "rolling back commit");
        self.undo(&commit.item_id, commit.rollback);
        self.notify(SyncFailure {
            sync_id,
            item_id: Some(commit.item_id.clone()),
            operation: Some(commit.operation),
            error: error.clone(),
            attempts,
        });
        if let Some(callback) = commit.callbacks.on_failure {
            callback(&error);
        }
        Reconciliation::RolledBack {
            sync_id,
            item_id: commit.item_id,
            error,
            cascaded,
        }
    }

    /// Reconciles local state with one worker event
    pub fn handle_event(&mut self, event: SyncEvent) -> Reconciliation {
        match event {
            SyncEvent::StatusUpdate(status) => {
                self.status = status.clone();
                Reconciliation::StatusChanged(status)
            }
            SyncEvent::OperationCompleted {
                item_id: sync_id,
                result,
                ..
            } => match self.pending.remove(&sync_id) {
                Some(commit) => {
                    debug!(%sync_id, item = %commit.item_id, "commit confirmed");
                    if let Some(callback) = commit.callbacks.on_success {
                        callback(&result);
                    }
                    self.release(&sync_id);
                    Reconciliation::Confirmed {
                        sync_id,
                        item_id: commit.item_id,
                    }
                }
                None => Reconciliation::Untracked(sync_id),
            },
            SyncEvent::OperationFailed {
                item_id: sync_id,
                error,
                attempts,
                permanent: false,
            } => Reconciliation::Retrying {
                sync_id,
                attempts,
                error,
            },
            SyncEvent::OperationFailed {
                item_id: sync_id,
                error,
                attempts,
                permanent: true,
            } => {
                if self.pending.contains_key(&sync_id) {
                    return self.roll_back(sync_id, error, attempts);
                }
                error!(%sync_id, error = %error, "untracked operation failed permanently");
                self.notify(SyncFailure {
                    sync_id,
                    item_id: None,
                    operation: None,
                    error,
                    attempts,
                });
                Reconciliation::Untracked(sync_id)
            }
            SyncEvent::QueueCleared { dropped } => {
                let abandoned: Vec<SyncItemId> = dropped
                    .into_iter()
                    .filter(|id| self.pending.remove(id).is_some())
                    .collect();
                if !abandoned.is_empty() {
                    info!(abandoned = abandoned.len(), "pending commits abandoned");
                }
                for sync_id in &abandoned {
                    self.release(sync_id);
                }
                Reconciliation::Abandoned(abandoned)
            }
        }
    }

    fn notify(&self, failure: SyncFailure) {
        if let Some(notifier) = &self.notifier {
            notifier.notify_failure(&failure);
        }
    }

    /// Handles every event that has already arrived
    pub fn pump(&mut self) -> Vec<Reconciliation> {
        let mut reconciled = Vec::new();
        while let Some(event) = self.events.try_recv() {
            reconciled.push(self.handle_event(event));
        }
        reconciled
    }

    /// Waits for the next worker event; `None` once the worker has stopped
    pub async fn next(&mut self) -> Option<Reconciliation> {
        let event = self.events.recv().await?;
        Some(self.handle_event(event))
    }

    /// Waits until every pending commit is confirmed, rolled back or abandoned
    pub async fn settle(&mut self) {
        while !self.pending.is_empty() {
            if self.next().await.is_none() {
                break;
            }
        }
    }

    pub fn force_sync(&self) -> Result<()> {
        self.sync.force_sync()
    }

    pub fn set_config(&self, patch: SyncConfigPatch) -> Result<()> {
        self.sync.set_config(patch)
    }

    /// Abandons every queued remote operation and keeps the local state as is
    ///
    /// Commits stay pending until the worker acknowledges the clear, so an
    /// outcome it reported before that is still reconciled.
    pub fn clear_queue(&mut self) -> Result<()> {
        self.sync.clear_queue()?;
        for commit in self.pending.values_mut() {
            commit.abandoned = true;
        }
        Ok(())
    }

    /// Stops the worker, reconciles its last events and hands back the board state
    ///
    /// With [`ShutdownMode::Drain`] every pending commit, held ones included,
    /// is settled first.
    pub async fn shutdown(mut self, mode: ShutdownMode) -> Result<ConsistencyManager> {
        if mode == ShutdownMode::Drain {
            self.settle().await;
        }
        self.sync.stop(mode).await?;
        self.pump();
        if !self.pending.is_empty() {
            warn!(unsettled = self.pending.len(), "commits left unsynced at shutdown");
        }
        Ok(self.state)
    }
}
