use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use thiserror::Error;

/// Errors produced by secure key store backends.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The backend could not be reached or refused the operation.
    #[error("key store backend failure: {reason}")]
    Backend { reason: String },
}

/// Named, persistent storage for hex-encoded key material (OS keychain in
/// production; memory in tests).
///
/// Entries are written at most once and read many times, so implementations
/// need no locking beyond what the backend already provides.
pub trait SecureKeyStore: Send + Sync {
    /// Fetch the value stored under `name`, or `None` when no entry exists.
    fn get(&self, name: &str) -> Result<Option<String>, KeyStoreError>;

    /// Store `value` under `name`, overwriting any existing entry.
    fn set(&self, name: &str, value: &str) -> Result<(), KeyStoreError>;
}

impl<S: SecureKeyStore + ?Sized> SecureKeyStore for Arc<S> {
    fn get(&self, name: &str) -> Result<Option<String>, KeyStoreError> {
        (**self).get(name)
    }

    fn set(&self, name: &str, value: &str) -> Result<(), KeyStoreError> {
        (**self).set(name, value)
    }
}

/// In-memory key store for tests and ephemeral sessions.
/// Clones share the same entries, which lets a test point two key managers
/// at one "installation".
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn entry_count(&self) -> Result<usize, KeyStoreError> {
        Ok(self.entries()?.len())
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, KeyStoreError> {
        self.inner.lock().map_err(|err| KeyStoreError::Backend {
            reason: format!("lock poisoned: {err}"),
        })
    }
}

impl SecureKeyStore for InMemoryKeyStore {
    fn get(&self, name: &str) -> Result<Option<String>, KeyStoreError> {
        Ok(self.entries()?.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), KeyStoreError> {
        self.entries()?.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entry_reads_as_none() {
        let store = InMemoryKeyStore::new();
        assert_eq!(store.get("encryption-key").expect("get"), None);
        assert_eq!(store.entry_count().expect("count"), 0);
    }

    #[test]
    fn clones_share_entries() {
        let store = InMemoryKeyStore::new();
        let other = store.clone();
        store.set("encryption-iv", "00ff").expect("set");

        assert_eq!(
            other.get("encryption-iv").expect("get").as_deref(),
            Some("00ff")
        );
        assert_eq!(other.entry_count().expect("count"), 1);
    }

    #[test]
    fn set_overwrites_existing_entry() {
        let store = InMemoryKeyStore::new();
        store.set("k", "aa").expect("first set");
        store.set("k", "bb").expect("second set");
        assert_eq!(store.get("k").expect("get").as_deref(), Some("bb"));
    }

    #[test]
    fn poisoned_lock_is_a_backend_error() {
        let store = InMemoryKeyStore::new();
        let inner = Arc::clone(&store.inner);
        let _ = std::thread::spawn(move || {
            let _guard = inner.lock().expect("lock");
            panic!("poison the entry map");
        })
        .join();

        assert!(matches!(store.entry_count(), Err(KeyStoreError::Backend { .. })));
        assert!(store.get("k").is_err());
        assert!(store.set("k", "aa").is_err());
    }
}
