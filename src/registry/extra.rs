// registry/extra.rs - Opaque Key/Value Persistence

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::Result;

const TREE_EXTRA: &str = "extra_data";

/// Where the PKI keeps blobs that must survive restarts: the roster
/// memento, the sync marker and the owner identity.
pub trait ExtraDataStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Encode `value` with bincode and store it under `key`
pub fn put_encoded<V: Serialize>(store: &dyn ExtraDataStore, key: &str, value: &V) -> Result<()> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
    store.put(key, &bytes)
}

/// Load and decode a value written by [`put_encoded`]
pub fn get_decoded<V: DeserializeOwned>(store: &dyn ExtraDataStore, key: &str) -> Result<Option<V>> {
    match store.get(key)? {
        Some(bytes) => {
            let (value, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Extra-data store backed by sled
pub struct SledExtraDataStore {
    db: Db,
    tree: Tree,
}

impl SledExtraDataStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE_EXTRA)?;
        Ok(Self { db, tree })
    }

    /// Create a store that vanishes on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree(TREE_EXTRA)?;
        Ok(Self { db, tree })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl ExtraDataStore for SledExtraDataStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.tree.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.tree.insert(key.as_bytes(), value)?;
        self.tree.flush()?;
        debug!(key, bytes = value.len(), "Stored extra data");
        Ok(())
    }
}

/// Extra-data store held in memory (for testing)
#[derive(Default)]
pub struct MemoryExtraDataStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryExtraDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtraDataStore for MemoryExtraDataStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
