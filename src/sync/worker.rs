//! The sync queue's background execution context.
//!
//! A single task owns the queue and drains it head first. It talks to the
//! outside only through the command and event channels, and the only await
//! that can take long is the gateway call of the head operation.

use crate::config::SyncConfig;
use crate::gateway::{GatewayResult, RemoteGateway};
use crate::sync::backoff::backoff_delay;
use crate::sync::item::{SyncOperation, SyncQueueItem};
use crate::sync::protocol::{OperationResult, ShutdownMode, SyncCommand, SyncEvent, SyncStatus};
use crate::sync::store::QueueStore;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

enum Wake {
    Command(Option<SyncCommand>),
    RetryDue,
}

pub(crate) struct SyncWorker {
    gateway: Arc<dyn RemoteGateway>,
    store: Option<Arc<dyn QueueStore>>,
    config: SyncConfig,
    queue: VecDeque<SyncQueueItem>,
    /// Head of the queue is backing off until this instant
    retry_at: Option<Instant>,
    status: SyncStatus,
    commands: UnboundedReceiver<SyncCommand>,
    events: UnboundedSender<SyncEvent>,
    stopping: Option<ShutdownMode>,
    commands_closed: bool,
}

impl SyncWorker {
    pub(crate) fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: Option<Arc<dyn QueueStore>>,
        commands: UnboundedReceiver<SyncCommand>,
        events: UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            gateway,
            store,
            config: SyncConfig::default(),
            queue: VecDeque::new(),
            retry_at: None,
            status: SyncStatus::default(),
            commands,
            events,
            stopping: None,
            commands_closed: false,
        }
    }

    pub(crate) async fn run(mut self) {
        self.restore().await;

        loop {
            self.drain_commands().await;

            if self.stopping == Some(ShutdownMode::Discard) {
                if !self.queue.is_empty() {
                    warn!(dropped = self.queue.len(), "discarding pending sync operations");
                    self.clear().await;
                }
                break;
            }

            let winding_down = self.stopping.is_some() || self.commands_closed;
            if winding_down && self.queue.is_empty() {
                break;
            }

            if self.head_ready() {
                self.process_head().await;
                continue;
            }

            let deadline = self.retry_at;
            if self.commands_closed {
                if let Some(deadline) = deadline {
                    sleep_until(deadline).await;
                }
                self.retry_at = None;
                continue;
            }

            let wake = tokio::select! {
                command = self.commands.recv() => Wake::Command(command),
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => Wake::RetryDue,
            };
            match wake {
                Wake::Command(Some(command)) => self.handle_command(command).await,
                Wake::Command(None) => self.commands_closed = true,
                Wake::RetryDue => self.retry_at = None,
            }
        }

        debug!("sync worker stopped");
    }

    fn head_ready(&self) -> bool {
        !self.queue.is_empty() && self.retry_at.map_or(true, |at| at <= Instant::now())
    }

    /// Handles every command already waiting, without blocking
    async fn drain_commands(&mut self) {
        while !self.commands_closed {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command).await,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.commands_closed = true,
            }
        }
    }

    async fn handle_command(&mut self, command: SyncCommand) {
        match command {
            SyncCommand::Init(mut config) => {
                config.validate();
                self.config = config;
                self.status.total_succeeded = 0;
                self.status.total_failed = 0;
                self.status.last_sync_at = None;
                debug!(?config, "sync worker initialized");
                self.publish_status();
            }
            SyncCommand::Enqueue(item) => {
                debug!(id = %item.id, operation = %item.operation_type(), "operation queued");
                self.queue.push_back(item);
                self.persist().await;
                self.publish_status();
            }
            SyncCommand::ForceSync => {
                if self.retry_at.take().is_some() {
                    debug!("backoff skipped by force sync");
                }
            }
            SyncCommand::ClearQueue => {
                if !self.queue.is_empty() {
                    info!(dropped = self.queue.len(), "sync queue cleared");
                }
                self.clear().await;
            }
            SyncCommand::SetConfig(patch) => {
                self.config.apply(&patch);
                debug!(config = ?self.config, "sync config updated");
            }
            SyncCommand::Shutdown(mode) => {
                debug!(?mode, pending = self.queue.len(), "sync worker shutting down");
                self.stopping = Some(mode);
            }
        }
    }

    /// Drops the whole queue and acknowledges it with the dropped ids
    async fn clear(&mut self) {
        let dropped = self.queue.drain(..).map(|item| item.id).collect();
        self.retry_at = None;
        self.persist().await;
        self.emit(SyncEvent::QueueCleared { dropped });
        self.publish_status();
    }

    async fn process_head(&mut self) {
        let Some(head) = self.queue.front_mut() else {
            return;
        };
        head.attempt_count += 1;
        let attempts = head.attempt_count;
        let id = head.id;
        let operation = head.operation.clone();

        self.status.is_processing = true;
        self.publish_status();
        let outcome = send_operation(self.gateway.as_ref(), &operation).await;
        self.status.is_processing = false;

        let event = match outcome {
            Ok(result) => {
                self.queue.pop_front();
                self.status.total_succeeded += 1;
                self.status.last_sync_at = Some(Utc::now());
                info!(%id, operation = %operation.operation_type(), attempts, "operation synced");
                SyncEvent::OperationCompleted {
                    item_id: id,
                    result,
                    attempts,
                }
            }
            Err(err) if err.is_transient() && attempts < self.config.retry_limit => {
                let delay = backoff_delay(&self.config, attempts);
                warn!(%id, attempts, ?delay, error = %err, "operation failed, retrying");
                self.retry_at = Some(Instant::now() + delay);
                SyncEvent::OperationFailed {
                    item_id: id,
                    error: err,
                    attempts,
                    permanent: false,
                }
            }
            Err(err) => {
                self.queue.pop_front();
                self.status.total_failed += 1;
                error!(%id, operation = %operation.operation_type(), attempts, error = %err, "operation failed permanently");
                revert_operation(self.gateway.as_ref(), &operation).await;
                SyncEvent::OperationFailed {
                    item_id: id,
                    error: err,
                    attempts,
                    permanent: true,
                }
            }
        };

        self.persist().await;
        self.emit(event);
        self.publish_status();
    }

    async fn restore(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.load().await {
            Ok(items) if !items.is_empty() => {
                info!(count = items.len(), "restored pending sync operations");
                self.queue.extend(items);
                self.publish_status();
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to restore sync queue"),
        }
    }

    async fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let items: Vec<SyncQueueItem> = self.queue.iter().cloned().collect();
        if let Err(err) = store.save(&items).await {
            warn!(error = %err, "failed to persist sync queue");
        }
    }

    fn publish_status(&self) {
        let snapshot = SyncStatus {
            queue_length: self.queue.len(),
            ..self.status.clone()
        };
        self.emit(SyncEvent::StatusUpdate(snapshot));
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.send(event).is_err() {
            debug!("sync event dropped, no listener");
        }
    }
}

async fn send_operation(
    gateway: &dyn RemoteGateway,
    operation: &SyncOperation,
) -> GatewayResult<OperationResult> {
    match operation {
        SyncOperation::Create { item, index } => {
            let stored = gateway.create_item(item).await?;
            if let Some(index) = index {
                gateway
                    .update_board_index(&index.board_id, &index.columns)
                    .await?;
            }
            Ok(OperationResult::Created(stored))
        }
        SyncOperation::Update { item_id, changes } => {
            gateway.update_item(item_id, changes).await?;
            Ok(OperationResult::Acknowledged)
        }
        SyncOperation::Delete { item_id, index } => {
            if let Some(index) = index {
                gateway
                    .update_board_index(&index.board_id, &index.columns)
                    .await?;
            }
            gateway.delete_item(item_id).await?;
            Ok(OperationResult::Acknowledged)
        }
        SyncOperation::Reorder {
            item_id,
            changes,
            index,
        } => {
            gateway.update_item(item_id, changes).await?;
            gateway
                .update_board_index(&index.board_id, &index.columns)
                .await?;
            Ok(OperationResult::Acknowledged)
        }
    }
}

/// Undoes whatever part of a rejected operation may have reached the remote store
///
/// A created item is deleted again and rewritten columns get their previous
/// id lists back, which also re-places the items listed in them.
async fn revert_operation(gateway: &dyn RemoteGateway, operation: &SyncOperation) {
    let id = operation.item_id();
    if let SyncOperation::Create { item, .. } = operation {
        if let Err(err) = gateway.delete_item(&item.id).await {
            error!(item = %id, error = %err, "could not remove rejected item from remote store");
        }
    }
    let Some(index) = operation.index_change() else {
        return;
    };
    if index.previous.is_empty() {
        return;
    }
    match gateway
        .update_board_index(&index.board_id, &index.previous)
        .await
    {
        Ok(()) => debug!(item = %id, board = %index.board_id, "remote index reverted"),
        Err(err) => {
            error!(item = %id, board = %index.board_id, error = %err, "could not revert remote index")
        }
    }
}
