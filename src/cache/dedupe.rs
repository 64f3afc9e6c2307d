//! At-most-one in-flight fetch per `(op, domain)`.
//!
//! A lock is the key `processing:{op}:{domain}` created with set-if-absent and a
//! short TTL. Its value is a random owner token, and release is a
//! compare-and-delete on that token, so a holder whose lock already expired can
//! never delete a lock that someone else now owns.
//!
//! [`DedupeGuard`] releases on drop as well as explicitly, so cancellation and
//! panics still clear the key; the TTL covers the case where even that fails.

use std::time::Duration;

use rand::Rng;

use super::CacheStore;
use crate::config::DEDUPE_KEY_PREFIX;
use crate::error_handling::StoreError;
use crate::store::SharedStore;

#[derive(Clone)]
pub struct DedupeLock {
    cache: CacheStore,
    ttl: Duration,
}

impl DedupeLock {
    pub fn new(cache: CacheStore, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn key(op: &str, domain: &str) -> String {
        format!("{DEDUPE_KEY_PREFIX}:{op}:{domain}")
    }

    /// Tries to claim the lock. `Ok(None)` means another request holds it.
    pub async fn acquire(&self, op: &str, domain: &str) -> Result<Option<DedupeGuard>, StoreError> {
        let key = Self::key(op, domain);
        let token = format!("{:032x}", rand::rng().random::<u128>());
        if self.cache.claim_once(&key, &token, self.ttl).await? {
            log::debug!("Acquired dedupe lock {key}");
            Ok(Some(DedupeGuard {
                store: self.cache.store().clone(),
                key,
                token,
                released: false,
            }))
        } else {
            log::debug!("Dedupe lock {key} is held elsewhere");
            Ok(None)
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Ownership of one dedupe lock.
pub struct DedupeGuard {
    store: SharedStore,
    key: String,
    token: String,
    released: bool,
}

impl DedupeGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the lock. Returns `false` if it had already expired or was
    /// never ours to delete.
    pub async fn release(mut self) -> bool {
        self.released = true;
        release_owned(&self.store, &self.key, &self.token).await
    }
}

impl Drop for DedupeGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("Dedupe lock {} dropped outside a runtime; TTL will clear it", self.key);
            return;
        };
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            release_owned(&store, &key, &token).await;
        });
    }
}

async fn release_owned(store: &SharedStore, key: &str, token: &str) -> bool {
    match store.delete_if_equals(key, token).await {
        Ok(true) => {
            log::debug!("Released dedupe lock {key}");
            true
        }
        Ok(false) => {
            log::debug!("Dedupe lock {key} was no longer ours at release");
            false
        }
        Err(e) => {
            log::warn!("Failed to release dedupe lock {key}, TTL will clear it: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    fn lock_on(store: Arc<MemoryStore>) -> DedupeLock {
        lock_with_ttl(store, Duration::from_secs(30))
    }

    fn lock_with_ttl(store: Arc<MemoryStore>, ttl: Duration) -> DedupeLock {
        DedupeLock::new(CacheStore::new(store, "test"), ttl)
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused_until_release() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock_on(store.clone());

        let guard = lock.acquire("whois", "example.com").await.unwrap().unwrap();
        assert_eq!(guard.key(), "processing:whois:example.com");
        assert!(lock.acquire("whois", "example.com").await.unwrap().is_none());
        // Different op is a different key
        assert!(lock.acquire("dns", "example.com").await.unwrap().is_some());

        assert!(guard.release().await);
        assert!(lock.acquire("whois", "example.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock_on(store.clone());
        {
            let _guard = lock.acquire("whois", "example.org").await.unwrap().unwrap();
        }
        for _ in 0..50 {
            if store.get("processing:whois:example.org").await.unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(lock.acquire("whois", "example.org").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_holder_cannot_delete_new_owner() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock_with_ttl(store.clone(), Duration::from_secs(1));

        let stale = lock.acquire("whois", "example.net").await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let fresh = lock.acquire("whois", "example.net").await.unwrap().unwrap();

        assert!(!stale.release().await);
        assert!(store.get(fresh.key()).await.unwrap().is_some());
        assert!(fresh.release().await);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let lock = lock_on(store);
        let attempts = (0..16).map(|_| {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("whois", "race.com").await.unwrap() })
        });
        let results = futures::future::join_all(attempts).await;
        let winners: Vec<DedupeGuard> = results.into_iter().filter_map(|r| r.unwrap()).collect();
        assert_eq!(winners.len(), 1);
    }
}
