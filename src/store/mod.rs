//! Shared key-value store.
//!
//! The cache, the dedupe locks and the rate-limit counters all live in one
//! external store shared by every service instance. This module defines the
//! small set of primitives they need, each of which must be atomic on the
//! store side:
//!
//! - `set_nx_ex`: create-if-absent with expiry (dedupe lock acquisition)
//! - `incr_with_expiry`: increment, setting the expiry only on creation
//!   (fixed-window counters)
//! - `delete_if_equals`: compare-and-delete (owner-checked lock release)
//!
//! Two backends implement [`KeyValueStore`]: [`RedisStore`] for production and
//! [`MemoryStore`] for single-process use and tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error_handling::StoreError;

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Shared handle to whichever store backend is configured.
pub type SharedStore = Arc<dyn KeyValueStore>;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Short backend name for logs and `/status`.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally sets `key` with a time-to-live.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Sets `key` only if it does not exist. Returns `true` if this call created it.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Increments the counter at `key` and returns the new value. The expiry is
    /// applied only when the increment created the key.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;

    /// Deletes `key` only if its current value equals `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Round-trip check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
