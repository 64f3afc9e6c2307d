//! Result cache and dedupe locks on the shared store.
//!
//! Cache keys follow `{namespace}:{recordType}:{domain}` and values are JSON.
//! Reads are read-through helpers for the provider manager: any store failure on
//! read degrades to a miss, so a cache outage costs latency, never correctness.
//! Writes are last-writer-wins; the TTL bounds staleness.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{CACHE_TTL_AVAILABLE, CACHE_TTL_DNS, CACHE_TTL_REGISTERED};
use crate::error_handling::StoreError;
use crate::store::SharedStore;

mod dedupe;

pub use dedupe::{DedupeGuard, DedupeLock};

/// The kinds of record kept in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Whois,
    Dns,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Whois => "whois",
            RecordType::Dns => "dns",
        }
    }
}

/// A value that can be stored in and served from the cache.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync {
    const RECORD_TYPE: RecordType;

    /// Whether this is a negative result (domain available / not found).
    fn is_negative(&self) -> bool {
        false
    }

    /// Called once before the value is written.
    fn stamp_stored(&mut self, at: DateTime<Utc>);

    /// Called on every cache hit.
    fn mark_cached(&mut self, read_at: DateTime<Utc>);
}

/// TTL for a record of `record_type`. Negative results expire sooner.
pub fn ttl_for(record_type: RecordType, negative: bool) -> Duration {
    match (record_type, negative) {
        (RecordType::Whois, false) => CACHE_TTL_REGISTERED,
        (RecordType::Whois, true) => CACHE_TTL_AVAILABLE,
        (RecordType::Dns, _) => CACHE_TTL_DNS,
    }
}

#[derive(Clone)]
pub struct CacheStore {
    store: SharedStore,
    namespace: String,
}

impl CacheStore {
    pub fn new(store: SharedStore, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn key(&self, record_type: RecordType, domain: &str) -> String {
        format!("{}:{}:{}", self.namespace, record_type.as_str(), domain)
    }

    /// Reads a cached value and flags it as served from cache.
    ///
    /// Returns `None` on a miss, on a store error, or if the stored value no
    /// longer decodes.
    pub async fn get<T: Cacheable>(&self, domain: &str) -> Option<T> {
        let key = self.key(T::RECORD_TYPE, domain);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::debug!("Cache MISS: {key}");
                return None;
            }
            Err(e) => {
                log::warn!("Cache read failed for {key}, treating as miss: {e}");
                return None;
            }
        };
        match serde_json::from_str::<T>(&raw) {
            Ok(mut value) => {
                log::debug!("Cache HIT: {key}");
                value.mark_cached(Utc::now());
                Some(value)
            }
            Err(e) => {
                log::warn!("Discarding undecodable cache entry {key}: {e}");
                None
            }
        }
    }

    /// Writes `value` with the TTL its record type and outcome call for.
    pub async fn set<T: Cacheable>(&self, domain: &str, value: &T) -> Result<Duration, StoreError>
    where
        T: Clone,
    {
        let mut stored = value.clone();
        stored.stamp_stored(Utc::now());
        let ttl = ttl_for(T::RECORD_TYPE, stored.is_negative());
        let key = self.key(T::RECORD_TYPE, domain);
        let json = serde_json::to_string(&stored)?;
        log::debug!("Cache SET: {key} (TTL: {ttl:?})");
        self.store.set_ex(&key, &json, ttl).await?;
        Ok(ttl)
    }

    /// Atomically creates `key` if absent. Returns `true` when this call claimed it.
    pub async fn claim_once(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.store.set_nx_ex(key, value, ttl).await
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}
