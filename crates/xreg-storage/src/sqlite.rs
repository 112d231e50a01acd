//! SQLite storage backend

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use xreg_core::{ChangeSet, EntityKind, EntityRecord, EntityUid, PropRow, PropValue};

use crate::error::{StorageError, StorageResult};
use crate::migration::Migratable;
use crate::traits::StorageBackend;

const ENTITY_COLUMNS: &str = "uid, kind, id, singular, plural, xid, parent";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

/// Columns of one `entities` row
struct EntityRow {
    uid: String,
    kind: String,
    id: String,
    singular: String,
    plural: String,
    xid: String,
    parent: Option<String>,
}

impl EntityRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uid: row.get(0)?,
            kind: row.get(1)?,
            id: row.get(2)?,
            singular: row.get(3)?,
            plural: row.get(4)?,
            xid: row.get(5)?,
            parent: row.get(6)?,
        })
    }

    fn into_record(self, props: Vec<PropRow>) -> StorageResult<EntityRecord> {
        let kind = EntityKind::parse(&self.kind)
            .ok_or_else(|| StorageError::Corrupt(format!("Unknown entity kind {:?}", self.kind)))?;
        let parent = self.parent.as_deref().map(parse_uid).transpose()?;
        Ok(EntityRecord {
            uid: parse_uid(&self.uid)?,
            kind,
            id: self.id,
            singular: self.singular,
            plural: self.plural,
            xid: self.xid,
            parent,
            props,
        })
    }
}

fn parse_uid(s: &str) -> StorageResult<EntityUid> {
    EntityUid::from_string(s).map_err(|e| StorageError::Corrupt(format!("Bad uid {:?}: {}", s, e)))
}

fn read_prop(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_prop(name: String, tag: &str, text: &str) -> StorageResult<PropRow> {
    Ok(PropRow {
        name,
        value: PropValue::decode(tag, text)?,
    })
}

fn write_record(conn: &Connection, record: &EntityRecord) -> StorageResult<()> {
    let uid = record.uid.to_string();
    conn.execute(
        "INSERT OR REPLACE INTO entities (uid, kind, id, singular, plural, xid, parent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            uid,
            record.kind.as_str(),
            record.id,
            record.singular,
            record.plural,
            record.xid,
            record.parent.as_ref().map(|p| p.to_string()),
        ],
    )?;
    conn.execute("DELETE FROM props WHERE uid = ?1", params![uid])?;

    let mut stmt =
        conn.prepare_cached("INSERT INTO props (uid, name, type, value) VALUES (?1, ?2, ?3, ?4)")?;
    for prop in &record.props {
        stmt.execute(params![
            uid,
            prop.name,
            prop.value.tag().to_string(),
            prop.value.text()
        ])?;
    }
    Ok(())
}

fn remove_record(conn: &Connection, uid: &EntityUid) -> StorageResult<()> {
    let uid = uid.to_string();
    conn.execute("DELETE FROM props WHERE uid = ?1", params![uid])?;
    conn.execute("DELETE FROM entities WHERE uid = ?1", params![uid])?;
    Ok(())
}

impl SqliteStorage {
    /// Open or create a SQLite database at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path).map_err(|e| StorageError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite database (for testing)
    pub fn in_memory() -> StorageResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StorageError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.migrate_to_latest()?;
        Ok(storage)
    }
}

impl Migratable for SqliteStorage {
    fn get_schema_version(&self) -> StorageResult<u32> {
        let conn = self.conn.lock().map_err(StorageError::lock)?;
        let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        Ok(version)
    }

    fn set_schema_version(&self, version: u32) -> StorageResult<()> {
        let conn = self.conn.lock().map_err(StorageError::lock)?;
        conn.pragma_update(None, "user_version", version)?;
        Ok(())
    }

    fn run_migration(&self, version: u32) -> StorageResult<()> {
        let conn = self.conn.lock().map_err(StorageError::lock)?;
        let sql = match version {
            1 => {
                r#"
                CREATE TABLE IF NOT EXISTS entities (
                    uid TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    id TEXT NOT NULL,
                    singular TEXT NOT NULL,
                    plural TEXT NOT NULL,
                    xid TEXT NOT NULL,
                    parent TEXT
                );

                CREATE TABLE IF NOT EXISTS props (
                    uid TEXT NOT NULL,
                    name TEXT NOT NULL,
                    type TEXT NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (uid, name)
                );
                "#
            }
            2 => {
                r#"
                CREATE INDEX IF NOT EXISTS idx_entities_xid ON entities(xid);
                CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(parent);
                "#
            }
            other => {
                return Err(StorageError::Migration(format!(
                    "No SQLite migration for version {}",
                    other
                )))
            }
        };
        conn.execute_batch(sql)
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        let conn = self.conn.lock().map_err(StorageError::lock)?;
        let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(one == 1)
    }

    async fn get_all_entities(&self) -> StorageResult<Vec<EntityRecord>> {
        let conn = self.conn.lock().map_err(StorageError::lock)?;

        let mut props: HashMap<String, Vec<PropRow>> = HashMap::new();
        let mut stmt = conn.prepare("SELECT uid, name, type, value FROM props")?;
        for row in stmt.query_map([], read_prop)? {
            let (uid, name, tag, text) = row?;
            props
                .entry(uid)
                .or_default()
                .push(decode_prop(name, &tag, &text)?);
        }

        let mut stmt = conn.prepare(&format!("SELECT {} FROM entities", ENTITY_COLUMNS))?;
        let rows = stmt
            .query_map([], EntityRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| {
                let rows = props.remove(&row.uid).unwrap_or_default();
                row.into_record(rows)
            })
            .collect()
    }

    async fn get_entity(&self, uid: &EntityUid) -> StorageResult<Option<EntityRecord>> {
        let conn = self.conn.lock().map_err(StorageError::lock)?;
        let key = uid.to_string();

        let row = conn
            .query_row(
                &format!("SELECT {} FROM entities WHERE uid = ?1", ENTITY_COLUMNS),
                params![key],
                EntityRow::from_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT uid, name, type, value FROM props WHERE uid = ?1")?;
        let mut props = Vec::new();
        for prop in stmt.query_map(params![key], read_prop)? {
            let (_, name, tag, text) = prop?;
            props.push(decode_prop(name, &tag, &text)?);
        }
        row.into_record(props).map(Some)
    }

    async fn save_entity(&self, record: &EntityRecord) -> StorageResult<()> {
        let mut conn = self.conn.lock().map_err(StorageError::lock)?;
        let tx = conn.transaction()?;
        write_record(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    async fn delete_entity(&self, uid: &EntityUid) -> StorageResult<()> {
        let mut conn = self.conn.lock().map_err(StorageError::lock)?;
        let tx = conn.transaction()?;
        remove_record(&tx, uid)?;
        tx.commit()?;
        Ok(())
    }

    async fn apply_changes(&self, changes: &ChangeSet) -> StorageResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock().map_err(StorageError::lock)?;
        let tx = conn.transaction()?;
        for uid in &changes.deleted {
            remove_record(&tx, uid)?;
        }
        for record in &changes.saved {
            write_record(&tx, record)?;
        }
        tx.commit()?;
        tracing::debug!(
            "Applied {} saves and {} deletes in one transaction",
            changes.saved.len(),
            changes.deleted.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::CURRENT_VERSION;
    use serde_json::json;
    use xreg_core::{
        GroupKey, GroupModel, Model, RegistryTree, ResourceModel, WriteMode, WriteOptions,
    };

    fn model() -> Model {
        Model::new().with_group(
            GroupModel::new("endpoints", "endpoint")
                .with_resource(ResourceModel::new("messages", "message")),
        )
    }

    fn populated() -> RegistryTree {
        let model = model();
        let mut tree = RegistryTree::new("reg");
        let key = GroupKey::new("endpoints", "e1").resource("messages", "m1");
        tree.write_resource(
            &model,
            &key,
            json!({"labels": {"stage": "prod"}, "list": [1, 2.5, "x"], "empty": {}}),
            WriteMode::Replace,
            &WriteOptions::default(),
        )
        .unwrap();
        tree
    }

    #[tokio::test]
    async fn test_sqlite_storage() {
        let storage = SqliteStorage::in_memory().unwrap();
        storage.initialize().await.unwrap();
        assert!(storage.health_check().await.unwrap());

        let tree = populated();
        let changes = tree.changes();
        storage.apply_changes(&changes).await.unwrap();

        let records = storage.get_all_entities().await.unwrap();
        assert_eq!(records.len(), changes.saved.len());

        let version = changes
            .saved
            .iter()
            .find(|r| r.kind == EntityKind::Version)
            .unwrap();
        let stored = storage.get_entity(&version.uid).await.unwrap().unwrap();
        assert_eq!(stored.xid, "/endpoints/e1/messages/m1/versions/1");
        assert_eq!(stored.parent, version.parent);

        let attributes = stored.into_entity().unwrap();
        assert_eq!(attributes.attributes()["labels"], json!({"stage": "prod"}));
        assert_eq!(attributes.attributes()["list"], json!([1, 2.5, "x"]));
        assert_eq!(attributes.attributes()["empty"], json!({}));

        storage.delete_entity(&version.uid).await.unwrap();
        assert!(storage.get_entity(&version.uid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_tree_roundtrip_and_deletes() {
        let storage = SqliteStorage::in_memory().unwrap();
        let mut tree = populated();
        storage.apply_changes(&tree.changes()).await.unwrap();
        tree.mark_committed();

        let loaded =
            RegistryTree::from_records("reg", storage.get_all_entities().await.unwrap()).unwrap();
        let key = GroupKey::new("endpoints", "e1").resource("messages", "m1");
        assert_eq!(loaded.resource(&key).unwrap().latest_id(), Some("1"));

        tree.delete_group(&GroupKey::new("endpoints", "e1"), &WriteOptions::default())
            .unwrap();
        let changes = tree.changes();
        assert_eq!(changes.deleted.len(), 4);
        storage.apply_changes(&changes).await.unwrap();
        assert_eq!(storage.get_all_entities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        let changes = populated().changes();
        {
            let storage = SqliteStorage::open(&path).unwrap();
            storage.apply_changes(&changes).await.unwrap();
        }

        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.get_schema_version().unwrap(), CURRENT_VERSION);
        assert_eq!(
            storage.get_all_entities().await.unwrap().len(),
            changes.saved.len()
        );
    }
}
