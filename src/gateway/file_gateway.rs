use crate::domain::{BoardId, ColumnId, Item, ItemId};
use crate::gateway::{GatewayError, GatewayResult, ItemUpdate, RemoteGateway};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File-based remote store: one JSON file per item and per board index
///
/// Serves as a local replica when no network store is configured.
pub struct FileGateway {
    root_path: PathBuf,
}

impl FileGateway {
    const STORE_DIR: &'static str = ".kanban-sync";
    const ITEMS_DIR: &'static str = "items";
    const BOARDS_DIR: &'static str = "boards";

    /// Creates a new FileGateway rooted in the given directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root_path: root.as_ref().join(Self::STORE_DIR),
        }
    }

    fn items_dir(&self) -> PathBuf {
        self.root_path.join(Self::ITEMS_DIR)
    }

    fn boards_dir(&self) -> PathBuf {
        self.root_path.join(Self::BOARDS_DIR)
    }

    fn item_file(&self, id: &ItemId) -> GatewayResult<PathBuf> {
        Ok(self.items_dir().join(record_file_name(id.as_str())?))
    }

    fn board_file(&self, id: &BoardId) -> GatewayResult<PathBuf> {
        Ok(self.boards_dir().join(record_file_name(id.as_str())?))
    }

    async fn ensure_directory_exists(&self, path: &Path) -> GatewayResult<()> {
        if !path.exists() {
            fs::create_dir_all(path).await?;
        }
        Ok(())
    }

    /// Creates the directory structure
    pub async fn initialize(&self) -> GatewayResult<()> {
        self.ensure_directory_exists(&self.items_dir()).await?;
        self.ensure_directory_exists(&self.boards_dir()).await?;
        Ok(())
    }

    pub async fn is_initialized(&self) -> bool {
        self.items_dir().exists() && self.boards_dir().exists()
    }

    async fn save_item(&self, item: &Item) -> GatewayResult<()> {
        self.ensure_directory_exists(&self.items_dir()).await?;
        let json = serde_json::to_string_pretty(item)?;
        fs::write(self.item_file(&item.id)?, json).await?;
        Ok(())
    }

    /// Loads a stored item, `None` if it does not exist
    pub async fn load_item(&self, id: &ItemId) -> GatewayResult<Option<Item>> {
        let file_path = self.item_file(id)?;
        if !file_path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&file_path).await?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Loads every stored item of a board, e.g. to seed a session
    pub async fn load_board_items(&self, board_id: &BoardId) -> GatewayResult<Vec<Item>> {
        let items_dir = self.items_dir();
        if !items_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&items_dir).await?;
        let mut items = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path).await?;
            let item: Item = serde_json::from_str(&contents)?;
            if &item.board_id == board_id {
                items.push(item);
            }
        }

        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    /// Loads a stored board index
    pub async fn load_board_index(
        &self,
        board_id: &BoardId,
    ) -> GatewayResult<BTreeMap<ColumnId, Vec<ItemId>>> {
        let file_path = self.board_file(board_id)?;
        if !file_path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&file_path).await?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// File name for a record id; ids that could leave the store directory are rejected
fn record_file_name(id: &str) -> GatewayResult<String> {
    let escapes = id.is_empty()
        || id.starts_with('.')
        || id.contains(&['/', '\\', '\0'][..])
        || id.contains("..");
    if escapes {
        return Err(GatewayError::Rejected(format!(
            "id '{}' is not a valid record name",
            id
        )));
    }
    Ok(format!("{}.json", id))
}

#[async_trait]
impl RemoteGateway for FileGateway {
    async fn create_item(&self, item: &Item) -> GatewayResult<Item> {
        self.save_item(item).await?;
        Ok(item.clone())
    }

    async fn update_item(&self, id: &ItemId, update: &ItemUpdate) -> GatewayResult<()> {
        let mut item = self
            .load_item(id)
            .await?
            .ok_or_else(|| GatewayError::Rejected(format!("unknown item {}", id)))?;
        update.apply_to(&mut item);
        self.save_item(&item).await
    }

    async fn delete_item(&self, id: &ItemId) -> GatewayResult<()> {
        let file_path = self.item_file(id)?;
        if file_path.exists() {
            fs::remove_file(file_path).await?;
        }
        Ok(())
    }

    async fn update_board_index(
        &self,
        board_id: &BoardId,
        columns: &BTreeMap<ColumnId, Vec<ItemId>>,
    ) -> GatewayResult<()> {
        self.ensure_directory_exists(&self.boards_dir()).await?;

        let mut stored = self.load_board_index(board_id).await?;
        for (column, ids) in columns {
            stored.insert(column.clone(), ids.clone());
        }

        let json = serde_json::to_string_pretty(&stored)?;
        fs::write(self.board_file(board_id)?, json).await?;

        for (column, ids) in columns {
            for (position, id) in ids.iter().enumerate() {
                let Some(mut item) = self.load_item(id).await? else {
                    continue;
                };
                if item.status != *column || item.position != position {
                    item.place(column.clone(), position);
                    self.save_item(&item).await?;
                }
            }
        }
        Ok(())
    }
}
