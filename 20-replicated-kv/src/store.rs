//! In-memory key-value storage, one instance per node.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Thread-safe map from key to value with last-write-wins semantics.
///
/// Every method holds the lock for a single map operation only. Nothing
/// that sends on the network or sleeps may run while the lock is held.
#[derive(Debug, Default)]
pub struct KvStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a key-value pair, overwriting any existing value.
    ///
    /// Returns the value that was replaced.
    pub fn put(&self, key: String, value: String) -> Option<String> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns a copy of all key-value pairs so callers never iterate under the lock.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
