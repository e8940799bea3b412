use crate::domain::{BoardId, ColumnId, Item, ItemId};
use crate::gateway::{GatewayError, GatewayResult, ItemUpdate, RemoteGateway};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

#[derive(Debug, Default)]
struct MemoryState {
    items: HashMap<ItemId, Item>,
    boards: HashMap<BoardId, BTreeMap<ColumnId, Vec<ItemId>>>,
    scripted: VecDeque<GatewayError>,
    offline: bool,
    calls: usize,
}

/// In-process remote store
///
/// Useful as an offline backend and for exercising the sync queue: failures
/// can be scripted per call and the whole store can be taken offline.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The next calls fail with these errors, in order
    pub fn script_failures(&self, failures: impl IntoIterator<Item = GatewayError>) {
        self.state().scripted.extend(failures);
    }

    /// While offline every call fails with a network error
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Number of calls received, failed ones included
    pub fn calls(&self) -> usize {
        self.state().calls
    }

    pub fn item(&self, id: &ItemId) -> Option<Item> {
        self.state().items.get(id).cloned()
    }

    pub fn item_count(&self) -> usize {
        self.state().items.len()
    }

    pub fn board_columns(&self, board_id: &BoardId) -> Option<BTreeMap<ColumnId, Vec<ItemId>>> {
        self.state().boards.get(board_id).cloned()
    }

    /// Stores an item directly, bypassing failure scripting
    pub fn seed_item(&self, item: Item) {
        self.state().items.insert(item.id.clone(), item);
    }

    /// Counts the call and returns the failure it should produce, if any
    fn begin_call(&self, operation: &str) -> GatewayResult<MutexGuard<'_, MemoryState>> {
        let mut state = self.state();
        state.calls += 1;
        trace!(operation, call = state.calls, "memory gateway call");

        if state.offline {
            return Err(GatewayError::Network("remote store unreachable".to_string()));
        }
        if let Some(failure) = state.scripted.pop_front() {
            return Err(failure);
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn create_item(&self, item: &Item) -> GatewayResult<Item> {
        let mut state = self.begin_call("create_item")?;
        state.items.insert(item.id.clone(), item.clone());
        Ok(item.clone())
    }

    async fn update_item(&self, id: &ItemId, update: &ItemUpdate) -> GatewayResult<()> {
        let mut state = self.begin_call("update_item")?;
        let item = state
            .items
            .get_mut(id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown item {}", id)))?;
        update.apply_to(item);
        Ok(())
    }

    async fn delete_item(&self, id: &ItemId) -> GatewayResult<()> {
        let mut state = self.begin_call("delete_item")?;
        state.items.remove(id);
        Ok(())
    }

    async fn update_board_index(
        &self,
        board_id: &BoardId,
        columns: &BTreeMap<ColumnId, Vec<ItemId>>,
    ) -> GatewayResult<()> {
        let mut state = self.begin_call("update_board_index")?;
        let MemoryState { items, boards, .. } = &mut *state;
        let board = boards.entry(board_id.clone()).or_default();
        for (column, ids) in columns {
            board.insert(column.clone(), ids.clone());
            for (position, id) in ids.iter().enumerate() {
                if let Some(item) = items.get_mut(id) {
                    item.place(column.clone(), position);
                }
            }
        }
        Ok(())
    }
}
