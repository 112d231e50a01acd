//! In-memory storage backend (for testing and ephemeral registries)

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use xreg_core::{ChangeSet, EntityRecord, EntityUid};

use crate::error::{StorageError, StorageResult};
use crate::traits::StorageBackend;

/// In-memory storage backend
pub struct MemoryStorage {
    entities: RwLock<HashMap<EntityUid, EntityRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        Ok(true)
    }

    async fn get_all_entities(&self) -> StorageResult<Vec<EntityRecord>> {
        let entities = self.entities.read().map_err(StorageError::lock)?;
        Ok(entities.values().cloned().collect())
    }

    async fn get_entity(&self, uid: &EntityUid) -> StorageResult<Option<EntityRecord>> {
        let entities = self.entities.read().map_err(StorageError::lock)?;
        Ok(entities.get(uid).cloned())
    }

    async fn save_entity(&self, record: &EntityRecord) -> StorageResult<()> {
        let mut entities = self.entities.write().map_err(StorageError::lock)?;
        entities.insert(record.uid.clone(), record.clone());
        Ok(())
    }

    async fn delete_entity(&self, uid: &EntityUid) -> StorageResult<()> {
        let mut entities = self.entities.write().map_err(StorageError::lock)?;
        entities.remove(uid);
        Ok(())
    }

    async fn apply_changes(&self, changes: &ChangeSet) -> StorageResult<()> {
        let mut entities = self.entities.write().map_err(StorageError::lock)?;
        for uid in &changes.deleted {
            entities.remove(uid);
        }
        for record in &changes.saved {
            entities.insert(record.uid.clone(), record.clone());
        }
        Ok(())
    }
}
