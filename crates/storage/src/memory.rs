use std::collections::BTreeMap;
use std::sync::RwLock;

use snafu::ensure;

use super::error::{EmptyKeySnafu, InvariantViolationSnafu, StorageResult};
use super::KeyValueStore;

/// Process-local store with the same contract as the sqlite backend.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| poisoned("memory-get"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        ensure!(!key.is_empty(), EmptyKeySnafu { stage: "memory-set" });
        let mut entries = self.entries.write().map_err(|_| poisoned("memory-set"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| poisoned("memory-remove"))?;
        entries.remove(key);
        Ok(())
    }
}

fn poisoned(stage: &'static str) -> super::StorageError {
    InvariantViolationSnafu {
        stage,
        details: "memory store lock was poisoned".to_string(),
    }
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_and_remove_forgets() {
        let store = MemoryKeyValueStore::new();
        store.set("history_alice", "[]").unwrap();
        store.set("history_alice", "[1]").unwrap();
        assert_eq!(store.get("history_alice").unwrap().as_deref(), Some("[1]"));

        store.remove("history_alice").unwrap();
        assert_eq!(store.get("history_alice").unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn keys_are_independent() {
        let store = MemoryKeyValueStore::new();
        store.set("history_bob", "[]").unwrap();
        store.set("currentUser", "{}").unwrap();

        store.remove("currentUser").unwrap();
        assert_eq!(store.get("history_bob").unwrap().as_deref(), Some("[]"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_key_is_rejected() {
        let store = MemoryKeyValueStore::new();
        assert!(matches!(
            store.set("", "value"),
            Err(super::super::StorageError::EmptyKey { .. })
        ));
    }
}
