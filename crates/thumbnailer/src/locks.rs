//! Per-thumbnail generation locks
//!
//! Only one thread in this process generates a given thumbnail at a time.
//! Other processes sharing the storage are not coordinated.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct GenerationLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl GenerationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.locks.lock().entry(key.to_string()).or_default().clone();
        let result = {
            let _guard = lock.lock_arc();
            f()
        };
        let mut locks = self.locks.lock();
        // The map and this call are the only holders: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        // Our handle goes before the map guard so the next caller counts exactly.
        drop(lock);
        drop(locks);
        result
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
