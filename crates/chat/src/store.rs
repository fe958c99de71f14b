use snafu::ResultExt;
use somnia_storage::KeyValueStore;

use crate::error::{ChatResult, EncodeHistorySnafu, HistoryStorageSnafu};
use crate::message::{Session, SessionId};

pub const HISTORY_KEY_PREFIX: &str = "history_";

pub fn history_key(username: &str) -> String {
    format!("{HISTORY_KEY_PREFIX}{username}")
}

/// Reads and writes the per-user session list.
#[derive(Debug, Clone)]
pub struct ChatStore<S> {
    store: S,
}

impl<S: KeyValueStore> ChatStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Missing or malformed history loads as empty; only a failed read is an error.
    pub fn load(&self, username: &str) -> ChatResult<Vec<Session>> {
        if username.is_empty() {
            return Ok(Vec::new());
        }

        let key = history_key(username);
        let Some(raw) = self.store.get(&key).context(HistoryStorageSnafu {
            stage: "chat-store-load",
            key: key.clone(),
        })?
        else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<Vec<Session>>(&raw) {
            Ok(sessions) => Ok(sessions),
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "discarding malformed chat history");
                Ok(Vec::new())
            }
        }
    }

    pub fn save(&self, username: &str, sessions: &[Session]) -> ChatResult<()> {
        if username.is_empty() {
            return Ok(());
        }

        let key = history_key(username);
        let encoded = serde_json::to_string(sessions).context(EncodeHistorySnafu {
            stage: "chat-store-save-encode",
            username: username.to_string(),
        })?;

        self.store.set(&key, &encoded).context(HistoryStorageSnafu {
            stage: "chat-store-save",
            key,
        })
    }
}

/// A user's session list that refuses to write before it has been loaded.
#[derive(Debug)]
pub struct ChatHistory<S> {
    store: ChatStore<S>,
    username: String,
    sessions: Vec<Session>,
    loaded: bool,
}

impl<S: KeyValueStore> ChatHistory<S> {
    pub fn new(store: ChatStore<S>, username: impl Into<String>) -> Self {
        Self {
            store,
            username: username.into(),
            sessions: Vec::new(),
            loaded: false,
        }
    }

    /// Returns whether the store was read. A failed read leaves the list and
    /// the write gate as they were, so history that could not be read is never
    /// overwritten.
    pub fn load(&mut self) -> bool {
        match self.store.load(&self.username) {
            Ok(sessions) => {
                self.sessions = sessions;
                self.loaded = true;
                tracing::debug!(
                    username = %self.username,
                    session_count = self.sessions.len(),
                    "loaded chat history"
                );
                true
            }
            Err(error) => {
                tracing::warn!(username = %self.username, error = %error, "failed to read chat history");
                false
            }
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.iter().find(|session| &session.id == id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.session(id).is_some()
    }

    pub fn push(&mut self, session: Session) {
        self.sessions.push(session);
        self.persist();
    }

    /// Applies `update` to one session and persists; `None` when the id is unknown.
    pub fn update<T>(&mut self, id: &SessionId, update: impl FnOnce(&mut Session) -> T) -> Option<T> {
        let session = self.sessions.iter_mut().find(|session| &session.id == id)?;
        let output = update(session);
        self.persist();
        Some(output)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let index = self.sessions.iter().position(|session| &session.id == id)?;
        let removed = self.sessions.remove(index);
        self.persist();
        Some(removed)
    }

    /// Writes the full list; returns whether a write happened.
    pub fn persist(&self) -> bool {
        if !self.loaded || self.username.is_empty() {
            return false;
        }

        match self.store.save(&self.username, &self.sessions) {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(username = %self.username, error = %error, "failed to save chat history");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use std::sync::atomic::{AtomicBool, Ordering};

    use somnia_storage::{MemoryKeyValueStore, StorageError, StorageResult};

    use super::*;
    use crate::error::ChatError;
    use crate::message::Message;

    /// Memory store whose reads can be switched to fail.
    #[derive(Default)]
    pub(crate) struct FlakyStore {
        pub(crate) inner: MemoryKeyValueStore,
        pub(crate) fail_reads: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> StorageResult<Option<String>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StorageError::InvariantViolation {
                    stage: "flaky-get",
                    details: "database is locked".to_string(),
                });
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> StorageResult<()> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> StorageResult<()> {
            self.inner.remove(key)
        }
    }

    fn store_with(raw: &str) -> ChatStore<Arc<MemoryKeyValueStore>> {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set(&history_key("alice"), raw).unwrap();
        ChatStore::new(kv)
    }

    #[test]
    fn malformed_history_loads_as_empty() {
        for raw in [
            "",
            "not json",
            "{\"id\":\"chat-1\"}",
            "42",
            "null",
            "[1, 2, 3]",
            "[{\"title\":\"missing id\"}]",
        ] {
            assert!(store_with(raw).load("alice").unwrap().is_empty(), "raw value {raw:?}");
        }
    }

    #[test]
    fn missing_history_and_empty_username_load_as_empty() {
        let store = ChatStore::new(MemoryKeyValueStore::new());
        assert!(store.load("alice").unwrap().is_empty());
        assert!(store.load("").unwrap().is_empty());
    }

    #[test]
    fn saved_history_round_trips_under_the_user_key() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let store = ChatStore::new(kv.clone());

        let mut session = Session::new(SessionId::new("chat-1"));
        session.title = "dream".to_string();
        session.messages.push(Message::user("dream"));
        store.save("alice", std::slice::from_ref(&session)).unwrap();

        assert!(kv.get("history_alice").unwrap().is_some());
        assert_eq!(store.load("alice").unwrap(), vec![session]);
        assert!(store.load("bob").unwrap().is_empty());
    }

    #[test]
    fn history_does_not_write_before_load() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        kv.set("history_alice", "[{\"id\":\"chat-1\",\"title\":\"kept\",\"messages\":[]}]")
            .unwrap();

        let mut history = ChatHistory::new(ChatStore::new(kv.clone()), "alice");
        assert!(!history.persist());
        history.push(Session::new(SessionId::new("chat-2")));
        assert_eq!(
            kv.get("history_alice").unwrap().as_deref(),
            Some("[{\"id\":\"chat-1\",\"title\":\"kept\",\"messages\":[]}]")
        );

        assert!(history.load());
        assert_eq!(history.sessions().len(), 1);
        history.push(Session::new(SessionId::new("chat-3")));
        assert_eq!(ChatStore::new(kv).load("alice").unwrap().len(), 2);
    }

    #[test]
    fn empty_username_never_saves() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut history = ChatHistory::new(ChatStore::new(kv.clone()), "");
        history.load();
        history.push(Session::new(SessionId::new("chat-1")));
        assert!(kv.is_empty());
    }

    #[test]
    fn read_failure_is_reported_not_treated_as_empty() {
        let kv = Arc::new(FlakyStore::default());
        kv.inner.set("history_alice", "[]").unwrap();
        kv.fail_reads.store(true, Ordering::SeqCst);

        assert!(matches!(
            ChatStore::new(kv).load("alice"),
            Err(ChatError::HistoryStorage { .. })
        ));
    }

    #[test]
    fn failed_read_keeps_history_from_being_overwritten() {
        let kv = Arc::new(FlakyStore::default());
        let stored = "[{\"id\":\"chat-1\",\"title\":\"kept\",\"messages\":[]}]";
        kv.inner.set("history_alice", stored).unwrap();
        kv.fail_reads.store(true, Ordering::SeqCst);

        let mut history = ChatHistory::new(ChatStore::new(kv.clone()), "alice");
        assert!(!history.load());
        history.push(Session::new(SessionId::new("chat-2")));
        assert_eq!(kv.inner.get("history_alice").unwrap().as_deref(), Some(stored));

        kv.fail_reads.store(false, Ordering::SeqCst);
        assert!(history.load());
        assert_eq!(history.sessions().len(), 1);
    }
}
