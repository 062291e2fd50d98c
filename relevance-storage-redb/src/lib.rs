//! # Relevance Storage - redb
//!
//! redb embedded bindings for the relevance engine.
//!
//! This crate provides:
//! - [`RedbDocumentStore`]: a durable single-node document store
//! - [`RedbObjectStore`]: cold-tier object storage in the same file format
//! - Postcard serialization for compact binary values
//! - Async wrappers (`spawn_blocking`) over synchronous redb transactions
//!
//! ## Example
//!
//! ```no_run
//! use relevance_storage_redb::RedbDocumentStore;
//! use std::path::Path;
//!
//! # async fn example() -> relevance_core::Result<()> {
//! let store = RedbDocumentStore::open(Path::new("./relevance.redb"))?;
//! # Ok(())
//! # }
//! ```

mod documents;
mod objects;
mod tables;

pub use documents::RedbDocumentStore;
pub use objects::RedbObjectStore;

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use relevance_core::{Error, Result};
use std::sync::Arc;

/// Maximum size accepted when deserializing a stored record (1 MB).
///
/// Prevents OOM from corrupt or oversized values.
pub const MAX_RECORD_SIZE: usize = 1_000_000;

pub(crate) type Bytes = Vec<u8>;

pub(crate) fn storage_err(context: &str, error: impl std::fmt::Display) -> Error {
    Error::Storage(format!("{context}: {error}"))
}

/// Insert one serialized value under a string key.
pub(crate) async fn insert_raw(
    db: Arc<redb::Database>,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
    key: String,
    value: Bytes,
) -> Result<()> {
    if value.len() > MAX_RECORD_SIZE {
        return Err(Error::Validation(format!(
            "record exceeds {MAX_RECORD_SIZE} bytes"
        )));
    }
    tokio::task::spawn_blocking(move || {
        let write_txn = db
            .begin_write()
            .map_err(|e| storage_err("begin write", e))?;
        {
            let mut handle = write_txn
                .open_table(table)
                .map_err(|e| storage_err("open table", e))?;
            handle
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| storage_err("insert", e))?;
        }
        write_txn.commit().map_err(|e| storage_err("commit", e))
    })
    .await
    .map_err(|e| storage_err("join", e))?
}

/// Read one raw value by key.
pub(crate) async fn get_raw(
    db: Arc<redb::Database>,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
    key: String,
) -> Result<Option<Bytes>> {
    tokio::task::spawn_blocking(move || {
        let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
        let handle = read_txn
            .open_table(table)
            .map_err(|e| storage_err("open table", e))?;
        match handle.get(key.as_str()).map_err(|e| storage_err("get", e))? {
            Some(guard) => Ok(Some(guard.value().to_vec())),
            None => Ok(None),
        }
    })
    .await
    .map_err(|e| storage_err("join", e))?
}

/// Remove a key. Returns whether it was present.
pub(crate) async fn remove_raw(
    db: Arc<redb::Database>,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
    key: String,
) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let write_txn = db
            .begin_write()
            .map_err(|e| storage_err("begin write", e))?;
        let removed = {
            let mut handle = write_txn
                .open_table(table)
                .map_err(|e| storage_err("open table", e))?;
            handle
                .remove(key.as_str())
                .map_err(|e| storage_err("remove", e))?
                .is_some()
        };
        write_txn.commit().map_err(|e| storage_err("commit", e))?;
        Ok(removed)
    })
    .await
    .map_err(|e| storage_err("join", e))?
}

/// All `(key, value)` pairs whose key starts with `prefix`.
pub(crate) async fn scan_prefix(
    db: Arc<redb::Database>,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
    prefix: String,
) -> Result<Vec<(String, Bytes)>> {
    tokio::task::spawn_blocking(move || {
        let read_txn = db.begin_read().map_err(|e| storage_err("begin read", e))?;
        let handle = read_txn
            .open_table(table)
            .map_err(|e| storage_err("open table", e))?;
        let mut out = Vec::new();
        for entry in handle.iter().map_err(|e| storage_err("iter", e))? {
            let (key, value) = entry.map_err(|e| storage_err("iter entry", e))?;
            let key = key.value().to_string();
            if key.starts_with(&prefix) {
                out.push((key, value.value().to_vec()));
            }
        }
        Ok(out)
    })
    .await
    .map_err(|e| storage_err("join", e))?
}

/// Remove every key in `keys`.
pub(crate) async fn remove_keys(
    db: Arc<redb::Database>,
    table: TableDefinition<'static, &'static str, &'static [u8]>,
    keys: Vec<String>,
) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let write_txn = db
            .begin_write()
            .map_err(|e| storage_err("begin write", e))?;
        {
            let mut handle = write_txn
                .open_table(table)
                .map_err(|e| storage_err("open table", e))?;
            for key in keys {
                handle
                    .remove(key.as_str())
                    .map_err(|e| storage_err("remove", e))?;
            }
        }
        write_txn.commit().map_err(|e| storage_err("commit", e))
    })
    .await
    .map_err(|e| storage_err("join", e))?
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
    postcard::to_allocvec(value).map_err(|e| storage_err("serialize", e))
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > MAX_RECORD_SIZE {
        return Err(Error::Integrity(format!(
            "stored record exceeds {MAX_RECORD_SIZE} bytes"
        )));
    }
    postcard::from_bytes(bytes).map_err(|e| storage_err("deserialize", e))
}
