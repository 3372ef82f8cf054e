//! Postgres pool bootstrap.
//!
//! The pool is bounded and acquisition blocks with a timeout instead of
//! creating connections without limit; statements carry a server-side
//! timeout so no query can hang a request. Connectivity failures at startup
//! are retried a bounded number of times and are fatal afterwards.

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use tracing::{info, warn};

use crate::config::Config;

/// Connect a bounded pool, retrying per the configured retry budget.
///
/// # Errors
///
/// Returns an error for an unparsable DSN, or once every connection attempt
/// has failed.
pub async fn connect_pool(config: &Config) -> Result<PgPool> {
    let statement_timeout = config.store_timeout().as_millis().to_string();
    let connect_options = PgConnectOptions::from_str(config.database_url())
        .context("invalid session store DSN")?
        .options([("statement_timeout", statement_timeout.as_str())]);

    let retries = config.store_retries();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let options = PgPoolOptions::new()
            .max_connections(config.max_connections())
            .min_connections(config.min_connections())
            .acquire_timeout(config.store_timeout());

        match options.connect_with(connect_options.clone()).await {
            Ok(pool) => {
                info!("Connected to the session store");
                return Ok(pool);
            }
            Err(err) if attempt < retries => {
                warn!("Session store connection attempt {attempt}/{retries} failed: {err}");
                tokio::time::sleep(config.store_retry_delay()).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to connect to the session store after {retries} attempts")
                });
            }
        }
    }
}
