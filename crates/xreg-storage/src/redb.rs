//! ReDB storage backend

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use xreg_core::{ChangeSet, EntityRecord, EntityUid};

use crate::error::{StorageError, StorageResult};
use crate::migration::Migratable;
use crate::traits::StorageBackend;

// Table definitions
const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");
const SCHEMA: TableDefinition<&str, u32> = TableDefinition::new("schema");

const SCHEMA_VERSION_KEY: &str = "version";

/// ReDB storage backend. Each entity record is one JSON value keyed by uid.
pub struct RedbStorage {
    db: Mutex<Database>,
}

impl RedbStorage {
    /// Open or create a ReDB database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path).map_err(|e| StorageError::Database(e.to_string()))?;

        {
            let write_txn = db
                .begin_write()
                .map_err(|e| StorageError::Database(e.to_string()))?;
            write_txn.open_table(SCHEMA)?;
            write_txn
                .commit()
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }

        let storage = Self { db: Mutex::new(db) };
        storage.migrate_to_latest()?;
        Ok(storage)
    }
}

impl Migratable for RedbStorage {
    fn get_schema_version(&self) -> StorageResult<u32> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SCHEMA)?;
        let version = table.get(SCHEMA_VERSION_KEY)?.map(|v| v.value());
        Ok(version.unwrap_or(0))
    }

    fn set_schema_version(&self, version: u32) -> StorageResult<()> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let write_txn = db.begin_write()?;
        {
            let mut table = write_txn.open_table(SCHEMA)?;
            table.insert(SCHEMA_VERSION_KEY, version)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn run_migration(&self, version: u32) -> StorageResult<()> {
        match version {
            1 => {
                let db = self.db.lock().map_err(StorageError::lock)?;
                let write_txn = db.begin_write()?;
                write_txn.open_table(ENTITIES)?;
                write_txn.commit()?;
                Ok(())
            }
            // Records are already keyed by uid; lookups by xid scan.
            2 => Ok(()),
            other => Err(StorageError::Migration(format!(
                "No ReDB migration for version {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl StorageBackend for RedbStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let read_txn = db.begin_read()?;
        read_txn.open_table(ENTITIES)?;
        Ok(true)
    }

    async fn get_all_entities(&self) -> StorageResult<Vec<EntityRecord>> {
        let db = self.db.lock().map_err(StorageError::lock)?;
        let read_txn = db
            .begin_read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let table = read_txn.open_table(ENTITIES)?;

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            records.push(serde_json::from_slice(value.value())?);
        }
        Ok(records)
    }

    async fn get_entity(&self, uid: &EntityUid) -> StorageResult<Option<EntityRecord>> {
        let key = uid.to_string();

        let db = self.db.lock().map_err(StorageError::lock)?;
        let read_txn = db
            .begin_read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        let table = read_txn.open_table(ENTITIES)?;

        if let Some(value) = table.get(key.as_str())? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    async fn save_entity(&self, record: &EntityRecord) -> StorageResult<()> {
        self.apply_changes(&ChangeSet {
            saved: vec![record.clone()],
            deleted: Vec::new(),
        })
        .await
    }

    async fn delete_entity(&self, uid: &EntityUid) -> StorageResult<()> {
        self.apply_changes(&ChangeSet {
            saved: Vec::new(),
            deleted: vec![uid.clone()],
        })
        .await
    }

    async fn apply_changes(&self, changes: &ChangeSet) -> StorageResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let db = self.db.lock().map_err(StorageError::lock)?;
        let write_txn = db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        {
            let mut table = write_txn.open_table(ENTITIES)?;
            for uid in &changes.deleted {
                let key = uid.to_string();
                table.remove(key.as_str())?;
            }
            for record in &changes.saved {
                let key = record.uid.to_string();
                let value = serde_json::to_vec(record)?;
                table.insert(key.as_str(), value.as_slice())?;
            }
        }
        write_txn.commit()?;
        tracing::debug!(
            "Applied {} saves and {} deletes in one transaction",
            changes.saved.len(),
            changes.deleted.len()
        );

        Ok(())
    }
}
