//! In-process store.
//!
//! Used when no Redis URL is configured and throughout the test suite. Expired
//! entries are dropped lazily on access. The store can be switched into an
//! unavailable mode to exercise fail-open and fail-closed paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::KeyValueStore;
use crate::error_handling::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    unavailable: AtomicBool,
    operations: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every operation fails with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of operations attempted so far.
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.with_entries(|entries| entries.values().filter(|e| e.is_live(now)).count())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store disabled".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    fn live_value(entries: &mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<String> {
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let now = Instant::now();
        Ok(self.with_entries(|entries| Self::live_value(entries, key, now)))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let entry = Entry {
            value: value.to_string(),
            expires_at: Some(Instant::now() + ttl),
        };
        self.with_entries(|entries| entries.insert(key.to_string(), entry));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        Ok(self.with_entries(|entries| {
            if Self::live_value(entries, key, now).is_some() {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: Some(now + ttl),
                },
            );
            true
        }))
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.check()?;
        let now = Instant::now();
        self.with_entries(|entries| {
            let current = match Self::live_value(entries, key, now) {
                Some(raw) => raw.parse::<i64>().map_err(|_| {
                    StoreError::Unavailable(format!("value at {key} is not an integer"))
                })?,
                None => 0,
            };
            let next = current + 1;
            let expires_at = if next == 1 {
                Some(now + ttl)
            } else {
                entries.get(key).and_then(|e| e.expires_at)
            };
            entries.insert(
                key.to_string(),
                Entry {
                    value: next.to_string(),
                    expires_at,
                },
            );
            Ok(next)
        })
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.check()?;
        let now = Instant::now();
        Ok(self.with_entries(|entries| {
            if Self::live_value(entries, key, now).as_deref() == Some(value) {
                entries.remove(key);
                true
            } else {
                false
            }
        }))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.with_entries(|entries| entries.remove(key));
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
