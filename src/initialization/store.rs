//! Shared store initialization.

use std::sync::Arc;

use crate::config::Config;
use crate::error_handling::InitializationError;
use crate::store::{MemoryStore, RedisStore, SharedStore};

/// Connects the key-value store behind the cache, limiters and dedupe locks.
///
/// Without a Redis URL an in-process store is used; limits and locks then only
/// hold within this one instance.
///
/// # Errors
///
/// Returns `InitializationError::StoreError` if Redis is configured but cannot
/// be reached after the startup retries.
pub async fn init_store(config: &Config) -> Result<SharedStore, InitializationError> {
    match config.redis_url.as_deref() {
        Some(url) => {
            let store = RedisStore::connect(url, config.store_timeout())
                .await
                .map_err(|e| InitializationError::StoreError(e.to_string()))?;
            Ok(Arc::new(store))
        }
        None => {
            log::warn!(
                "No Redis URL configured: using an in-process store. \
                 Rate limits and dedupe locks are NOT shared between instances."
            );
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
