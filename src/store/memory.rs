//! In-memory session store for development and testing.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::store::{SessionRecord, SessionStore, StoreResult};

/// In-memory implementation of [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemorySessionStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding one session.
    pub fn with_session(id: &str, record: SessionRecord) -> Self {
        let store = Self::new();
        store
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), record);
        store
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(id).cloned())
    }

    fn save(&self, id: &str, record: &SessionRecord) -> StoreResult<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(id.to_string(), record.clone());
        Ok(())
    }

    fn clear(&self, id: &str) -> StoreResult<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Credentials;

    #[test]
    fn test_save_load_clear() {
        let store = MemorySessionStore::new();
        assert_eq!(store.load("default").unwrap(), None);

        let record = SessionRecord::new(&Credentials::generate(), None);
        store.save("default", &record).unwrap();
        assert_eq!(store.load("default").unwrap(), Some(record));
        assert_eq!(store.load("other").unwrap(), None);

        store.clear("default").unwrap();
        assert_eq!(store.load("default").unwrap(), None);
        store.clear("default").unwrap();
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let store = std::sync::Arc::new(MemorySessionStore::new());
        let record = SessionRecord::new(&Credentials::generate(), None);
        store.save("default", &record).unwrap();

        let poisoner = std::sync::Arc::clone(&store);
        let result = std::thread::spawn(move || {
            let _guard = poisoner.sessions.write().unwrap();
            panic!("poison the session lock");
        })
        .join();
        assert!(result.is_err());
        assert!(store.sessions.is_poisoned());

        assert_eq!(store.load("default").unwrap(), Some(record));
        store.clear("default").unwrap();
        assert_eq!(store.load("default").unwrap(), None);
    }
}
