//! Fixed-window rate limiting for the authentication endpoints.
//!
//! The counter lives in the key-value store under `ratelimit:{scope}` and
//! gets its TTL on the first increment of each window. Windows are discrete,
//! not sliding, so a burst straddling a window boundary can briefly exceed
//! the limit; that is the documented trade-off of this strategy.
//!
//! Unlike every other component in this crate, the limiter fails OPEN: if
//! the store is unreachable, requests are admitted and a degraded-mode event
//! is logged. Availability wins over strictness here, and only here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::kv::{KeyValueStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Rejected { retry_after: u64 },
}

/// Counter scope: an authenticated principal when the request context has
/// one, otherwise the client address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateScope {
    Principal(String),
    Ip(String),
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(id) => write!(f, "user:{id}"),
            Self::Ip(addr) => write!(f, "ip:{addr}"),
        }
    }
}

pub struct RateLimiter {
    limit: u64,
    window: Duration,
    kv: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limit: u64, window: Duration, kv: Arc<dyn KeyValueStore>) -> Self {
        Self { limit, window, kv }
    }

    /// Count the request against its window and decide.
    ///
    /// Store failures never reject: the limiter logs the degraded mode and
    /// admits the request.
    pub async fn admit(&self, scope: &RateScope) -> Decision {
        match self.try_admit(scope).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!("Rate limiter degraded, admitting {scope}: {err}");
                Decision::Allowed
            }
        }
    }

    async fn try_admit(&self, scope: &RateScope) -> Result<Decision, StoreError> {
        let key = format!("ratelimit:{scope}");
        let count = self.kv.increment(&key).await?;
        if count == 1 {
            self.kv.expire(&key, self.window).await?;
        }

        if count > i64::try_from(self.limit).unwrap_or(i64::MAX) {
            let retry_after = self
                .kv
                .time_to_live(&key)
                .await?
                .unwrap_or(self.window)
                .as_secs();
            warn!("Rate limit exceeded for {key} count={count}");
            return Ok(Decision::Rejected { retry_after });
        }

        Ok(Decision::Allowed)
    }
}
