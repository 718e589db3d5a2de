//! Keyed async lock registry.
//!
//! [`LockRegistry`] maps arbitrary string keys to lazily created FIFO-fair
//! async mutexes (`tokio::sync::Mutex` acquires in request order). It is an
//! explicit injected object rather than a process-wide singleton so tests
//! get per-database isolation and deterministic teardown.
//!
//! Lock namespaces used by this crate:
//!
//! | Prefix | Serializes |
//! |--------|------------|
//! | `mutate:<table>/<key>` | put/delete of one primary record |
//! | `entry:<keyspace>:<derived-key>` | rewrites of one index entry |
//! | `index:<source-url>` | the whole indexing pass for one source |

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map from string key to async mutex, created on first use.
///
/// Entries are retained for the registry's lifetime; the registry lives as
/// long as its owning [`Database`](crate::Database).
pub struct LockRegistry {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Acquire the mutex registered under `key`, creating it if absent.
    ///
    /// Suspends the calling task until the mutex is free. The returned guard
    /// releases on drop, including on panic inside the critical section.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// Number of keys ever locked through this registry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().unwrap().is_empty()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let registry = Arc::new(LockRegistry::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire("shared").await;
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                // no other task entered the section while we held the lock
                assert_eq!(counter.load(Ordering::SeqCst), seen + 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let registry = LockRegistry::new();
        let _a = registry.acquire("a").await;
        // acquiring a different key while "a" is held must not suspend
        let _b = registry.acquire("b").await;
        assert_eq!(registry.len(), 2);
    }
}
