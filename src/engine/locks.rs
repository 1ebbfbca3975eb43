// src/engine/locks.rs

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed async mutexes serializing mutations of one session (or one user) in this process.
///
/// Entries are dropped once no guard or waiter references them.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    entries: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

/// Held for the whole read-modify-write of one operation.
pub struct KeyGuard {
    key: i64,
    entries: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: i64) -> KeyGuard {
        let mutex = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.entry(key).or_default().clone()
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            entries: self.entries.clone(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map still points at the mutex: nobody holds or waits for it.
        if entries
            .get(&self.key)
            .is_some_and(|m| Arc::strong_count(m) == 1)
        {
            entries.remove(&self.key);
        }
    }
}
