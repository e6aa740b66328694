use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Timed out after {waited_ms}ms waiting for lock on {key}")]
pub struct LockTimeout {
    pub key: String,
    pub waited_ms: u64,
}

/// Serializes work per key (a doctor's day, a service day) with a bounded wait.
///
/// Guards are released on drop. Entries no longer referenced by any guard are
/// pruned on the next acquisition.
pub struct KeyedLocks<K> {
    entries: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

/// Held locks for one or more keys.
#[derive(Debug)]
pub struct KeyGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone + Display,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn acquire(&self, key: &K) -> Result<KeyGuard, LockTimeout> {
        self.acquire_many(std::slice::from_ref(key)).await
    }

    /// Locks every key in ascending order so that overlapping multi-key
    /// acquisitions cannot deadlock.
    pub async fn acquire_many(&self, keys: &[K]) -> Result<KeyGuard, LockTimeout> {
        let mut ordered: Vec<K> = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let started = Instant::now();
        let mut guards = Vec::with_capacity(ordered.len());

        for key in &ordered {
            let mutex = self.entry(key);
            let remaining = self.timeout.saturating_sub(started.elapsed());

            match tokio::time::timeout(remaining, mutex.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    warn!("Lock wait on {} exceeded {}ms", key, self.timeout.as_millis());
                    return Err(LockTimeout {
                        key: key.to_string(),
                        waited_ms,
                    });
                }
            }
        }

        debug!("Acquired {} key lock(s) in {}ms", guards.len(), started.elapsed().as_millis());
        Ok(KeyGuard { _guards: guards })
    }

    fn entry(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|existing, mutex| existing == key || Arc::strong_count(mutex) > 1);
        entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<K> Debug for KeyedLocks<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLocks")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn second_holder_times_out_while_first_holds_the_key() {
        let locks = KeyedLocks::<String>::new(Duration::from_millis(50));
        let key = "doctor-1/2026-03-02".to_string();

        let held = locks.acquire(&key).await.expect("first acquisition");
        let err = locks.acquire(&key).await.unwrap_err();
        assert_eq!(err.key, key);

        drop(held);
        assert_matches!(locks.acquire(&key).await, Ok(_));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_contend() {
        let locks = KeyedLocks::<String>::new(Duration::from_millis(50));
        let _a = locks.acquire(&"a".to_string()).await.expect("a");
        let _b = locks.acquire(&"b".to_string()).await.expect("b");
    }

    #[tokio::test]
    async fn acquire_many_dedups_and_releases_everything_on_drop() {
        let locks = KeyedLocks::<String>::new(Duration::from_millis(50));
        let keys = vec!["b".to_string(), "a".to_string(), "b".to_string()];

        let guard = locks.acquire_many(&keys).await.expect("both keys");
        assert_matches!(locks.acquire(&"a".to_string()).await, Err(LockTimeout { .. }));
        drop(guard);

        assert_matches!(locks.acquire_many(&keys).await, Ok(_));
    }

    #[tokio::test]
    async fn released_entries_are_pruned() {
        let locks = KeyedLocks::<String>::new(Duration::from_millis(50));
        for n in 0..10 {
            let _guard = locks.acquire(&format!("day-{}", n)).await.expect("lock");
        }
        assert_eq!(locks.tracked_keys(), 1);
    }
}
