//! Persistence collaborator contract.
//!
//! Surrounding layers persist configuration blobs (app data, login secrets)
//! through a [`Store`]. Keys are namespaced strings built with
//! [`store_key`]; values are opaque JSON.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StoreError;

/// Build a namespaced key, e.g. `store_key("neotool", "appData")`.
pub fn store_key(namespace: &str, key: &str) -> String {
    format!("{namespace}/{key}")
}

/// Key/value persistence for JSON blobs.
///
/// Implementations must be cheap to share across tasks.
pub trait Store: Send + Sync {
    /// Load the value stored under `key`, or `None` if absent.
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    fn save(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// In-memory [`Store`] for tests and the simulation binary.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<(), StoreError> {
        tracing::debug!(key, "store save");
        self.inner.lock().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(store_key("neotool", "appData"), "neotool/appData");
    }

    #[test]
    fn load_missing_key_is_none() {
        let store = MemoryStore::new();

        assert_eq!(store.load("missing").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn save_replaces_and_is_shared_between_clones() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.save("k", json!({"a": 1})).unwrap();
        clone.save("k", json!({"a": 2})).unwrap();

        assert_eq!(store.load("k").unwrap(), Some(json!({"a": 2})));
        assert_eq!(store.len(), 1);
    }
}
