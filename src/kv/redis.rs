//! Redis-backed key-value store.
//!
//! Uses a [`ConnectionManager`] so clones share one multiplexed connection
//! that reconnects on failure. Every operation is bounded by the configured
//! timeout; a timed-out call surfaces as [`StoreError::Timeout`], never as an
//! authentication failure.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use super::{KeyValueStore, StoreError};

#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
    timeout: Duration,
}

impl RedisKv {
    /// Connect with bounded retries, verifying the server with a `PING`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] once every attempt has failed.
    pub async fn connect(
        url: &str,
        timeout: Duration,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::try_connect(&client, timeout).await {
                Ok(manager) => {
                    info!("Connected to the key-value store");
                    return Ok(Self { manager, timeout });
                }
                Err(err) if attempt < retries => {
                    warn!("Key-value store connection attempt {attempt}/{retries} failed: {err}");
                    tokio::time::sleep(retry_delay).await;
                }
                Err(err) => {
                    return Err(StoreError::Unavailable(format!(
                        "failed to connect after {retries} attempts: {err}"
                    )));
                }
            }
        }
    }

    async fn try_connect(
        client: &redis::Client,
        timeout: Duration,
    ) -> Result<ConnectionManager, StoreError> {
        let connect = async {
            let mut manager = client.get_connection_manager().await?;
            let _pong: String = redis::cmd("PING").query_async(&mut manager).await?;
            Ok::<ConnectionManager, redis::RedisError>(manager)
        };
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(manager)) => Ok(manager),
            Ok(Err(err)) => Err(StoreError::Unavailable(err.to_string())),
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(StoreError::Unavailable(err.to_string())),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisKv {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        self.bounded(async move { conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await })
            .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        self.bounded(async move { conn.exists::<_, bool>(key).await })
            .await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        // GETDEL is a single round-trip, so racing takers serialize on the
        // server and exactly one gets the value.
        let mut conn = self.manager.clone();
        self.bounded(async move { conn.get_del::<_, Option<String>>(key).await })
            .await
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.manager.clone();
        self.bounded(async move { conn.incr::<_, _, i64>(key, 1).await })
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let seconds = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        self.bounded(async move { conn.expire::<_, bool>(key, seconds).await })
            .await
            .map(|_| ())
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.manager.clone();
        let remaining = self
            .bounded(async move { conn.ttl::<_, i64>(key).await })
            .await?;
        // Negative replies mean "missing" or "no TTL".
        Ok(u64::try_from(remaining).ok().map(Duration::from_secs))
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let scan_conn = self.manager.clone();
        let del_conn = self.manager.clone();
        self.bounded(async move {
            let mut scan_conn = scan_conn;
            let mut keys: Vec<String> = Vec::new();
            {
                let mut iter: redis::AsyncIter<String> = scan_conn.scan_match(pattern).await?;
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
            }
            if keys.is_empty() {
                return Ok(0);
            }
            let mut del_conn = del_conn;
            del_conn.del::<_, u64>(keys).await
        })
        .await
    }
}
