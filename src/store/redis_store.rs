//! Redis-backed store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisResult, Script};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

use super::KeyValueStore;
use crate::config::{REDIS_CONNECT_INITIAL_DELAY_MS, REDIS_CONNECT_MAX_ATTEMPTS};
use crate::error_handling::StoreError;

/// INCR, and set the expiry only when the key was just created.
static INCR_WITH_EXPIRY: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local count = redis.call('INCR', KEYS[1])
        if count == 1 then
            redis.call('PEXPIRE', KEYS[1], ARGV[1])
        end
        return count
        "#,
    )
});

/// Delete the key only if it still holds the caller's value.
static DELETE_IF_EQUALS: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0
        "#,
    )
});

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connects to `redis_url`, retrying with exponential backoff.
    ///
    /// Every subsequent operation is bounded by `op_timeout` on the client side.
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        log::info!("Connecting to Redis at {}", redact_url(redis_url));
        let client = redis::Client::open(redis_url)?;

        let strategy = ExponentialBackoff::from_millis(REDIS_CONNECT_INITIAL_DELAY_MS)
            .max_delay(Duration::from_secs(2))
            .take(REDIS_CONNECT_MAX_ATTEMPTS);

        let conn = Retry::spawn(strategy, || {
            let client = client.clone();
            async move {
                ConnectionManager::new(client).await.map_err(|e| {
                    log::warn!("Redis connection attempt failed: {e}");
                    e
                })
            }
        })
        .await?;

        log::info!("Connected to Redis");
        Ok(Self { conn, op_timeout })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                log::debug!("Redis {op} failed: {e}");
                Err(StoreError::from(e))
            }
            Err(_) => {
                log::debug!("Redis {op} timed out after {:?}", self.op_timeout);
                Err(StoreError::Timeout(self.op_timeout))
            }
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("GET", async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let millis = ttl_millis(ttl);
        self.bounded("SET PX", async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let millis = ttl_millis(ttl);
        let reply = self
            .bounded("SET NX PX", async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(millis)
                    .query_async::<Option<String>>(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let millis = ttl_millis(ttl);
        self.bounded("INCR", async move {
            INCR_WITH_EXPIRY
                .key(key)
                .arg(millis)
                .invoke_async::<i64>(&mut conn)
                .await
        })
        .await
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted = self
            .bounded("compare-and-delete", async move {
                DELETE_IF_EQUALS
                    .key(key)
                    .arg(value)
                    .invoke_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(deleted == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("DEL", async move { conn.del::<_, ()>(key).await })
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("PING", async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Strips credentials from a connection URL before it is logged.
fn redact_url(redis_url: &str) -> String {
    match url::Url::parse(redis_url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("****"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable url>".to_string(),
    }
}
