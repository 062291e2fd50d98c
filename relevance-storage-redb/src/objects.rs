//! Cold-tier object store over redb.

use async_trait::async_trait;
use redb::Database;
use relevance_core::{ObjectStore, Result};
use std::path::Path;
use std::sync::Arc;

use crate::tables::OBJECTS;
use crate::{get_raw, insert_raw, remove_raw, storage_err};

/// Cold object storage in a redb file. Values are opaque byte blobs; the
/// engine serializes demoted memories into them.
pub struct RedbObjectStore {
    db: Arc<Database>,
}

impl RedbObjectStore {
    /// Open (or create) an object store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| storage_err("open database", e))?;
        let write_txn = db.begin_write().map_err(|e| storage_err("begin write", e))?;
        write_txn
            .open_table(OBJECTS)
            .map_err(|e| storage_err("create table", e))?;
        write_txn.commit().map_err(|e| storage_err("commit", e))?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Share a database already opened by [`crate::RedbDocumentStore`],
    /// keeping warm and cold tiers in one file.
    pub fn with_database(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write().map_err(|e| storage_err("begin write", e))?;
        write_txn
            .open_table(OBJECTS)
            .map_err(|e| storage_err("create table", e))?;
        write_txn.commit().map_err(|e| storage_err("commit", e))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl ObjectStore for RedbObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        insert_raw(self.db.clone(), OBJECTS, key.to_string(), bytes).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        get_raw(self.db.clone(), OBJECTS, key.to_string()).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        remove_raw(self.db.clone(), OBJECTS, key.to_string()).await
    }
}
