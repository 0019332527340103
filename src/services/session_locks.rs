//! Keyed async locks.
//!
//! Commit, delete and the metadata phase of a chunk upload all serialize on
//! the lock of the upload they touch. Artifact registration and deletion
//! serialize on the artifact's SHA-256. Distinct keys are independent.

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex, PoisonError, Weak},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Registry of per-key locks, keyed by upload id unless stated otherwise.
///
/// Only weak references are kept, so a lock disappears once no task holds or
/// waits on it, and dead entries are swept whenever a new one is inserted.
#[derive(Clone)]
pub struct SessionLocks<K = Uuid> {
    inner: Arc<Mutex<HashMap<K, Weak<AsyncMutex<()>>>>>,
}

impl<K> Default for SessionLocks<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> SessionLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        self.lock_for(key).lock_owned().await
    }

    fn lock_for(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        map.retain(|_, weak| weak.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        map.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
