//! Per-key shared/exclusive locks.
//!
//! `KeyedLocks` hands out owned tokio `RwLock` guards keyed by an
//! arbitrary hashable key. Locks for distinct keys never contend; readers
//! of the same key proceed in parallel; a writer excludes every reader of
//! its key. Guards release on drop, so every exit path of a caller
//! (including `?` early returns) releases the lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// A table of lazily created per-key read/write locks.
pub struct KeyedLocks<K> {
    table: Mutex<HashMap<K, Arc<RwLock<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the lock for a key.
    ///
    /// The table mutex is held only for the lookup, never across an await.
    fn slot(&self, key: &K) -> Arc<RwLock<()>> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Acquire the shared lock for `key`.
    pub async fn read(&self, key: &K) -> OwnedRwLockReadGuard<()> {
        self.slot(key).read_owned().await
    }

    /// Acquire the exclusive lock for `key`.
    pub async fn write(&self, key: &K) -> OwnedRwLockWriteGuard<()> {
        self.slot(key).write_owned().await
    }

    /// Whether any guard (shared or exclusive) is currently held for `key`.
    pub fn is_locked(&self, key: &K) -> bool {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        match table.get(key) {
            Some(lock) => lock.try_write().is_err(),
            None => false,
        }
    }

    /// Drop the table entry for `key` if nobody holds or awaits it.
    ///
    /// Returns true if the entry was removed.
    pub fn forget(&self, key: &K) -> bool {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = table
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            table.remove(key);
        }
        idle
    }

    /// Number of keys with a lock entry.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn readers_share_a_key() {
        let locks = KeyedLocks::new();
        let key = "app-1".to_string();

        let first = locks.read(&key).await;
        let second = tokio::time::timeout(Duration::from_millis(200), locks.read(&key))
            .await
            .expect("second reader should not block");

        assert!(locks.is_locked(&key));
        drop(first);
        drop(second);
        assert!(!locks.is_locked(&key));
    }

    #[tokio::test]
    async fn writer_excludes_readers_of_same_key_only() {
        let locks = KeyedLocks::new();
        let a = "a".to_string();
        let b = "b".to_string();

        let _writer = locks.write(&a).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.read(&a)).await;
        assert!(blocked.is_err());

        let other = tokio::time::timeout(Duration::from_millis(200), locks.read(&b)).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn forget_only_removes_idle_entries() {
        let locks = KeyedLocks::new();
        let key = "k".to_string();

        let guard = locks.read(&key).await;
        assert!(!locks.forget(&key));
        assert_eq!(locks.len(), 1);

        drop(guard);
        assert!(locks.forget(&key));
        assert!(locks.is_empty());
    }

    #[test]
    fn unknown_key_is_unlocked() {
        let locks: KeyedLocks<String> = KeyedLocks::default();
        assert!(!locks.is_locked(&"nope".to_string()));
        assert!(!locks.forget(&"nope".to_string()));
    }
}
