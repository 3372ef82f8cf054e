//! Process-scoped context for the two stores.
//!
//! Built exactly once at startup and passed by handle to every component;
//! there are no lazily-mutated globals anywhere in this crate. Both stores
//! must come up within the configured retry budget or startup fails.

use anyhow::{Context as _, Result};
use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::db;
use crate::kv::{KeyValueStore, RedisKv};

pub struct AppContext {
    config: Config,
    pool: PgPool,
    kv: Arc<dyn KeyValueStore>,
}

impl AppContext {
    /// Connect both stores and assemble the context.
    ///
    /// # Errors
    ///
    /// Returns an error if either store stays unreachable through the
    /// configured retries.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let pool = db::connect_pool(&config).await?;
        let kv = RedisKv::connect(
            config.redis_url(),
            config.store_timeout(),
            config.store_retries(),
            config.store_retry_delay(),
        )
        .await
        .context("failed to connect to the key-value store")?;

        Ok(Self {
            config,
            pool,
            kv: Arc::new(kv),
        })
    }

    /// Assemble a context around already-connected stores.
    #[must_use]
    pub fn from_parts(config: Config, pool: PgPool, kv: Arc<dyn KeyValueStore>) -> Self {
        Self { config, pool, kv }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[must_use]
    pub fn kv(&self) -> Arc<dyn KeyValueStore> {
        self.kv.clone()
    }
}
