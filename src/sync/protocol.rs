//! Messages exchanged between the UI side and the sync worker.
//!
//! Only data crosses the boundary. Success and failure callbacks stay in a
//! table on the sending side, keyed by [`SyncItemId`].

use crate::config::{SyncConfig, SyncConfigPatch};
use crate::domain::Item;
use crate::gateway::GatewayError;
use crate::sync::item::{SyncItemId, SyncQueueItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the worker treats pending work when told to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Keep processing (retries included) until the queue is empty
    Drain,
    /// Drop whatever is still queued
    Discard,
}

/// UI → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncCommand {
    Init(SyncConfig),
    Enqueue(SyncQueueItem),
    ForceSync,
    ClearQueue,
    SetConfig(SyncConfigPatch),
    Shutdown(ShutdownMode),
}

/// Worker → UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEvent {
    StatusUpdate(SyncStatus),
    OperationCompleted {
        item_id: SyncItemId,
        result: OperationResult,
        attempts: u32,
    },
    OperationFailed {
        item_id: SyncItemId,
        error: GatewayError,
        attempts: u32,
        permanent: bool,
    },
    /// Acknowledges `CLEAR_QUEUE` (or a discarding shutdown) with the
    /// operations dropped without an outcome
    QueueCleared {
        dropped: Vec<SyncItemId>,
    },
}

/// What the remote store answered for a completed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    /// The stored copy returned by a create
    Created(Item),
    Acknowledged,
}

/// Snapshot of the queue, emitted after every change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub queue_length: usize,
    pub is_processing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub total_succeeded: u64,
    pub total_failed: u64,
}

impl SyncStatus {
    /// Nothing pending and nothing in flight
    pub fn is_idle(&self) -> bool {
        self.queue_length == 0 && !self.is_processing
    }
}
