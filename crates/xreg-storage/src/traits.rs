//! Storage backend trait

use async_trait::async_trait;
use xreg_core::{ChangeSet, EntityRecord, EntityUid};

use crate::error::StorageResult;

/// Persistence collaborator for registry entities.
///
/// Backends store flat [`EntityRecord`]s; the tree is rebuilt by the caller.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Initialize the storage (create tables, run migrations)
    async fn initialize(&self) -> StorageResult<()>;

    /// Close the storage connection
    async fn close(&self) -> StorageResult<()>;

    /// Check if storage is healthy
    async fn health_check(&self) -> StorageResult<bool>;

    /// Load every stored entity
    async fn get_all_entities(&self) -> StorageResult<Vec<EntityRecord>>;

    async fn get_entity(&self, uid: &EntityUid) -> StorageResult<Option<EntityRecord>>;

    /// Insert or replace an entity together with all its properties
    async fn save_entity(&self, record: &EntityRecord) -> StorageResult<()>;

    async fn delete_entity(&self, uid: &EntityUid) -> StorageResult<()>;

    /// Apply one transaction's writes. Backends that can should override
    /// this so the whole set commits or fails together.
    async fn apply_changes(&self, changes: &ChangeSet) -> StorageResult<()> {
        for uid in &changes.deleted {
            self.delete_entity(uid).await?;
        }
        for record in &changes.saved {
            self.save_entity(record).await?;
        }
        Ok(())
    }
}
