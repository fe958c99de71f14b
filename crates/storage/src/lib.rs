pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryKeyValueStore;
pub use sqlite::{DEFAULT_STORAGE_DB_FILE_NAME, SqliteKeyValueStore};

/// Durable string-keyed storage shared by every persisted record of the app.
///
/// Calls are synchronous on purpose: callers treat persistence as a local
/// side effect of a state change, never as an await point.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
}

impl<T> KeyValueStore for std::sync::Arc<T>
where
    T: KeyValueStore + ?Sized,
{
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }
}
