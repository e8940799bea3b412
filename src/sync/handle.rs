use crate::config::{SyncConfig, SyncConfigPatch};
use crate::error::{KanbanError, Result};
use crate::gateway::RemoteGateway;
use crate::sync::item::{SyncItemId, SyncOperation, SyncQueueItem};
use crate::sync::protocol::{ShutdownMode, SyncCommand, SyncEvent};
use crate::sync::store::QueueStore;
use crate::sync::worker::SyncWorker;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::debug;

/// Command side of a running sync worker
///
/// Dropping the handle lets the worker drain what is queued and stop; use
/// [`SyncHandle::shutdown`] to choose between draining and discarding and
/// to wait for the worker to finish.
#[derive(Debug)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<SyncCommand>,
    task: Option<JoinHandle<()>>,
}

/// Event side of a running sync worker
#[derive(Debug)]
pub struct SyncEvents {
    events: mpsc::UnboundedReceiver<SyncEvent>,
}

impl SyncHandle {
    /// Starts a worker on the current tokio runtime and sends it `INIT`
    ///
    /// With a `store`, operations persisted by a previous session are
    /// restored ahead of anything enqueued through this handle.
    pub fn spawn(
        gateway: Arc<dyn RemoteGateway>,
        config: SyncConfig,
        store: Option<Arc<dyn QueueStore>>,
    ) -> (Self, SyncEvents) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let worker = SyncWorker::new(gateway, store, command_rx, event_tx);
        let task = tokio::spawn(worker.run());

        let handle = Self {
            commands: command_tx,
            task: Some(task),
        };
        // The receiver cannot be gone yet.
        let _ = handle.send(SyncCommand::Init(config));

        (handle, SyncEvents { events: event_rx })
    }

    fn send(&self, command: SyncCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| KanbanError::WorkerUnavailable)
    }

    /// Queues an operation and returns the id its outcome will be reported under
    pub fn enqueue(&self, operation: SyncOperation) -> Result<SyncItemId> {
        self.enqueue_item(SyncQueueItem::new(operation))
    }

    pub fn enqueue_item(&self, item: SyncQueueItem) -> Result<SyncItemId> {
        let id = item.id;
        self.send(SyncCommand::Enqueue(item))?;
        Ok(id)
    }

    /// Replaces the retry policy and resets the cumulative counters
    pub fn init(&self, config: SyncConfig) -> Result<()> {
        self.send(SyncCommand::Init(config))
    }

    /// Retries the head of the queue now instead of waiting out its backoff
    pub fn force_sync(&self) -> Result<()> {
        self.send(SyncCommand::ForceSync)
    }

    /// Drops every pending operation; no outcome is reported for them
    pub fn clear_queue(&self) -> Result<()> {
        self.send(SyncCommand::ClearQueue)
    }

    pub fn set_config(&self, patch: SyncConfigPatch) -> Result<()> {
        self.send(SyncCommand::SetConfig(patch))
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Stops the worker and waits for it to exit
    pub async fn shutdown(mut self, mode: ShutdownMode) -> Result<()> {
        self.stop(mode).await
    }

    /// Same as [`SyncHandle::shutdown`] for a handle that stays owned by its caller
    pub async fn stop(&mut self, mode: ShutdownMode) -> Result<()> {
        if self.send(SyncCommand::Shutdown(mode)).is_err() {
            debug!("sync worker already stopped");
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|_| KanbanError::WorkerUnavailable)?;
        }
        Ok(())
    }
}

impl SyncEvents {
    /// Waits for the next event; `None` once the worker has stopped
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        self.events.recv().await
    }

    /// Next event if one is already waiting
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Every event already waiting
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BoardId, ColumnId, Item, ItemId, ItemPatch};
    use crate::gateway::{GatewayError, ItemUpdate, MemoryGateway};
    use crate::sync::protocol::{OperationResult, SyncStatus};
    use crate::sync::store::FileQueueStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config(retry_limit: u32) -> SyncConfig {
        SyncConfig {
            retry_limit,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }

    fn delete(id: &str) -> SyncOperation {
        SyncOperation::Delete {
            item_id: ItemId::new(id),
            index: None,
        }
    }

    fn last_status(events: &[SyncEvent]) -> SyncStatus {
        events
            .iter()
            .rev()
            .find_map(|event| match event {
                SyncEvent::StatusUpdate(status) => Some(status.clone()),
                _ => None,
            })
            .unwrap()
    }

    fn failures(events: &[SyncEvent]) -> Vec<(u32, bool)> {
        events
            .iter()
            .filter_map(|event| match event {
                SyncEvent::OperationFailed {
                    attempts,
                    permanent,
                    ..
                } => Some((*attempts, *permanent)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_drains_all_operations() {
        let gateway = Arc::new(MemoryGateway::new());
        let (handle, mut events) = SyncHandle::spawn(gateway.clone(), config(3), None);

        for i in 0..5 {
            handle.enqueue(delete(&format!("item-{i}"))).unwrap();
        }
        handle.shutdown(ShutdownMode::Drain).await.unwrap();

        let events = events.drain();
        let status = last_status(&events);
        assert_eq!(status.queue_length, 0);
        assert_eq!(status.total_succeeded, 5);
        assert_eq!(status.total_failed, 0);
        assert!(status.last_sync_at.is_some());
        assert_eq!(gateway.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_bounded_by_retry_limit() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.set_offline(true);
        let (handle, mut events) = SyncHandle::spawn(gateway.clone(), config(4), None);

        handle.enqueue(delete("a")).unwrap();
        handle.shutdown(ShutdownMode::Drain).await.unwrap();

        let events = events.drain();
        assert_eq!(
            failures(&events),
            vec![(1, false), (2, false), (3, false), (4, true)]
        );
        assert_eq!(gateway.calls(), 4);
        assert_eq!(last_status(&events).total_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_permanent_on_first_attempt() {
        let gateway = Arc::new(MemoryGateway::new());
        let (handle, mut events) = SyncHandle::spawn(gateway.clone(), config(3), None);

        handle
            .enqueue(SyncOperation::Update {
                item_id: ItemId::new("ghost"),
                changes: ItemUpdate::fields(ItemPatch::title("x")),
            })
            .unwrap();
        handle.shutdown(ShutdownMode::Drain).await.unwrap();

        assert_eq!(failures(&events.drain()), vec![(1, true)]);
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_succeeds_on_third_attempt() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.seed_item(Item::with_id(
            ItemId::new("y"),
            BoardId::new("b1"),
            ColumnId::new("todo"),
            "y",
        ));
        gateway.script_failures([GatewayError::Timeout, GatewayError::Timeout]);
        let (handle, mut events) = SyncHandle::spawn(gateway.clone(), config(3), None);

        let id = handle
            .enqueue(SyncOperation::Update {
                item_id: ItemId::new("y"),
                changes: ItemUpdate::fields(ItemPatch::title("renamed")),
            })
            .unwrap();
        handle.shutdown(ShutdownMode::Drain).await.unwrap();

        let events = events.drain();
        assert_eq!(failures(&events), vec![(1, false), (2, false)]);
        assert!(events.iter().any(|event| matches!(
            event,
            SyncEvent::OperationCompleted { item_id, attempts: 3, result: OperationResult::Acknowledged }
                if *item_id == id
        )));
        assert_eq!(last_status(&events).total_succeeded, 1);
        assert_eq!(gateway.item(&ItemId::new("y")).unwrap().title, "renamed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_queue_drops_pending_without_outcomes() {
        let gateway = Arc::new(MemoryGateway::new());
        let (handle, mut events) = SyncHandle::spawn(gateway.clone(), config(3), None);

        handle.enqueue(delete("a")).unwrap();
        handle.enqueue(delete("b")).unwrap();
        handle.clear_queue().unwrap();
        let kept = handle.enqueue(delete("c")).unwrap();
        handle.shutdown(ShutdownMode::Drain).await.unwrap();

        let events = events.drain();
        let outcomes: Vec<SyncItemId> = events
            .iter()
            .filter_map(|event| match event {
                SyncEvent::OperationCompleted { item_id, .. }
                | SyncEvent::OperationFailed { item_id, .. } => Some(*item_id),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes, vec![kept]);
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_sync_skips_backoff() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.script_failures([GatewayError::Network("flaky".into())]);
        let slow = SyncConfig {
            retry_limit: 3,
            base_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
        };
        let (handle, mut events) = SyncHandle::spawn(gateway.clone(), slow, None);
        handle.enqueue(delete("a")).unwrap();

        loop {
            if let Some(SyncEvent::OperationFailed { .. }) = events.recv().await {
                break;
            }
        }
        let failed_at = tokio::time::Instant::now();
        handle.force_sync().unwrap();

        loop {
            if let Some(SyncEvent::OperationCompleted { .. }) = events.recv().await {
                break;
            }
        }
        assert!(failed_at.elapsed() < Duration::from_secs(60));
        handle.shutdown(ShutdownMode::Drain).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_config_lowers_retry_limit() {
        let gateway = Arc::new(MemoryGateway::new());
        gateway.set_offline(true);
        let (handle, mut events) = SyncHandle::spawn(gateway.clone(), config(10), None);

        handle
            .set_config(SyncConfigPatch {
                retry_limit: Some(2),
                ..SyncConfigPatch::default()
            })
            .unwrap();
        handle.enqueue(delete("a")).unwrap();
        handle.shutdown(ShutdownMode::Drain).await.unwrap();

        assert_eq!(failures(&events.drain()), vec![(1, false), (2, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_shutdown_skips_pending_work() {
        let gateway = Arc::new(MemoryGateway::new());
        let (handle, mut events) = SyncHandle::spawn(gateway.clone(), config(3), None);

        handle.enqueue(delete("a")).unwrap();
        handle.enqueue(delete("b")).unwrap();
        handle.shutdown(ShutdownMode::Discard).await.unwrap();

        assert_eq!(gateway.calls(), 0);
        assert_eq!(last_status(&events.drain()).queue_length, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_worker_stopped_fails() {
        let gateway = Arc::new(MemoryGateway::new());
        let (handle, _events) = SyncHandle::spawn(gateway, config(3), None);
        let commands = handle.commands.clone();
        handle.shutdown(ShutdownMode::Drain).await.unwrap();

        let orphan = SyncHandle {
            commands,
            task: None,
        };
        assert!(!orphan.is_running());
        assert!(matches!(
            orphan.enqueue(delete("a")),
            Err(KanbanError::WorkerUnavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_queue_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        let store = Arc::new(FileQueueStore::new(&path));

        let gateway = Arc::new(MemoryGateway::new());
        gateway.set_offline(true);
        let (handle, mut events) =
            SyncHandle::spawn(gateway.clone(), config(5), Some(store.clone()));
        handle.enqueue(delete("a")).unwrap();

        loop {
            if let Some(SyncEvent::OperationFailed { .. }) = events.recv().await {
                break;
            }
        }
        let persisted = store.load().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].attempt_count, 1);
        handle.shutdown(ShutdownMode::Discard).await.unwrap();

        // A new session starts from the snapshot taken while offline.
        let restored = Arc::new(FileQueueStore::new(temp_dir.path().join("restored.json")));
        restored.save(&persisted).await.unwrap();
        let online = Arc::new(MemoryGateway::new());
        let (handle, mut events) =
            SyncHandle::spawn(online.clone(), config(5), Some(restored.clone()));
        handle.shutdown(ShutdownMode::Drain).await.unwrap();

        assert_eq!(last_status(&events.drain()).total_succeeded, 1);
        assert_eq!(online.calls(), 1);
        assert!(restored.load().await.unwrap().is_empty());
    }
}
