//! Process-wide configuration for the security core.
//!
//! Every knob is read once at startup, either from the environment
//! (`GARDISTO_*` variables) or through the builder methods, and is immutable
//! afterwards. Secret material is held in [`secrecy::SecretString`] so it
//! never shows up in debug output.

use anyhow::{bail, Context, Result};
use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_ALGORITHM: Algorithm = Algorithm::HS256;
const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: u64 = 30;
const DEFAULT_REFRESH_TOKEN_TTL_DAYS: u64 = 7;
const DEFAULT_LOCKOUT_MINUTES: u64 = 15;
const DEFAULT_RATE_LIMIT: u64 = 30;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 60;
const DEFAULT_STORE_RETRIES: u32 = 3;
const DEFAULT_STORE_RETRY_DELAY_SECONDS: u64 = 3;
const DEFAULT_STORE_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_DATABASE_URL: &str = "postgres://localhost:5432/gardisto";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";

#[derive(Clone, Debug)]
pub struct Config {
    secret_key: SecretString,
    algorithm: Algorithm,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    lockout_duration: Duration,
    rate_limit: u64,
    rate_limit_window: Duration,
    store_retries: u32,
    store_retry_delay: Duration,
    store_timeout: Duration,
    max_connections: u32,
    min_connections: u32,
    database_url: String,
    redis_url: String,
}

impl Config {
    #[must_use]
    pub fn new(secret_key: SecretString) -> Self {
        Self {
            secret_key,
            algorithm: DEFAULT_ALGORITHM,
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_MINUTES * 60),
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_DAYS * 86_400),
            lockout_duration: Duration::from_secs(DEFAULT_LOCKOUT_MINUTES * 60),
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
            store_retries: DEFAULT_STORE_RETRIES,
            store_retry_delay: Duration::from_secs(DEFAULT_STORE_RETRY_DELAY_SECONDS),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECONDS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }

    /// Build the configuration from `GARDISTO_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `GARDISTO_SECRET_KEY` is missing or empty, if a
    /// numeric variable fails to parse, or if the configured algorithm is not
    /// in the HMAC family.
    pub fn from_env() -> Result<Self> {
        let secret = std::env::var("GARDISTO_SECRET_KEY").unwrap_or_default();
        if secret.is_empty() {
            bail!("GARDISTO_SECRET_KEY must be set and non-empty");
        }

        let mut config = Self::new(SecretString::from(secret));

        if let Ok(value) = std::env::var("GARDISTO_ALGORITHM") {
            config = config.with_algorithm(parse_algorithm(&value)?);
        }

        config = config
            .with_access_token_ttl(Duration::from_secs(
                env_u64("GARDISTO_ACCESS_TOKEN_TTL_MINUTES", DEFAULT_ACCESS_TOKEN_TTL_MINUTES)?
                    * 60,
            ))
            .with_refresh_token_ttl(Duration::from_secs(
                env_u64("GARDISTO_REFRESH_TOKEN_TTL_DAYS", DEFAULT_REFRESH_TOKEN_TTL_DAYS)?
                    * 86_400,
            ))
            .with_lockout_duration(Duration::from_secs(
                env_u64("GARDISTO_LOCKOUT_MINUTES", DEFAULT_LOCKOUT_MINUTES)? * 60,
            ))
            .with_rate_limit(env_u64("GARDISTO_RATE_LIMIT", DEFAULT_RATE_LIMIT)?)
            .with_rate_limit_window(Duration::from_secs(env_u64(
                "GARDISTO_RATE_LIMIT_WINDOW_SECONDS",
                DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            )?))
            .with_store_retries(env_u32("GARDISTO_STORE_RETRIES", DEFAULT_STORE_RETRIES)?)
            .with_store_retry_delay(Duration::from_secs(env_u64(
                "GARDISTO_STORE_RETRY_DELAY_SECONDS",
                DEFAULT_STORE_RETRY_DELAY_SECONDS,
            )?))
            .with_store_timeout(Duration::from_secs(env_u64(
                "GARDISTO_STORE_TIMEOUT_SECONDS",
                DEFAULT_STORE_TIMEOUT_SECONDS,
            )?))
            .with_max_connections(env_u32("GARDISTO_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?)
            .with_min_connections(env_u32("GARDISTO_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS)?);

        if let Ok(url) = std::env::var("GARDISTO_DATABASE_URL") {
            config = config.with_database_url(url);
        }
        if let Ok(url) = std::env::var("GARDISTO_REDIS_URL") {
            config = config.with_redis_url(url);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_lockout_duration(mut self, duration: Duration) -> Self {
        self.lockout_duration = duration;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, limit: u64) -> Self {
        self.rate_limit = limit;
        self
    }

    #[must_use]
    pub fn with_rate_limit_window(mut self, window: Duration) -> Self {
        self.rate_limit_window = window;
        self
    }

    #[must_use]
    pub fn with_store_retries(mut self, retries: u32) -> Self {
        self.store_retries = retries;
        self
    }

    #[must_use]
    pub fn with_store_retry_delay(mut self, delay: Duration) -> Self {
        self.store_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    #[must_use]
    pub fn with_database_url(mut self, url: String) -> Self {
        self.database_url = url;
        self
    }

    #[must_use]
    pub fn with_redis_url(mut self, url: String) -> Self {
        self.redis_url = url;
        self
    }

    #[must_use]
    pub fn secret_key(&self) -> &SecretString {
        &self.secret_key
    }

    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        self.access_token_ttl
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        self.refresh_token_ttl
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    #[must_use]
    pub fn rate_limit(&self) -> u64 {
        self.rate_limit
    }

    #[must_use]
    pub fn rate_limit_window(&self) -> Duration {
        self.rate_limit_window
    }

    #[must_use]
    pub fn store_retries(&self) -> u32 {
        self.store_retries
    }

    #[must_use]
    pub fn store_retry_delay(&self) -> Duration {
        self.store_retry_delay
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    #[must_use]
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    #[must_use]
    pub fn min_connections(&self) -> u32 {
        self.min_connections
    }

    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }
}

fn parse_algorithm(value: &str) -> Result<Algorithm> {
    let algorithm = Algorithm::from_str(value)
        .with_context(|| format!("unknown signing algorithm: {value}"))?;
    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => Ok(algorithm),
        other => bail!("unsupported signing algorithm for a shared secret: {other:?}"),
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .with_context(|| format!("{name} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u32>()
            .with_context(|| format!("{name} must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::time::Duration;

    fn test_config() -> Config {
        Config::new(SecretString::from("test-secret".to_string()))
    }

    #[test]
    fn config_defaults() {
        let config = test_config();
        assert_eq!(config.algorithm(), Algorithm::HS256);
        assert_eq!(config.access_token_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.refresh_token_ttl(), Duration::from_secs(7 * 86_400));
        assert_eq!(config.lockout_duration(), Duration::from_secs(15 * 60));
        assert_eq!(config.rate_limit(), 30);
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.store_retries(), 3);
        assert_eq!(config.store_retry_delay(), Duration::from_secs(3));
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_connections(), 20);
        assert_eq!(config.min_connections(), 1);
    }

    #[test]
    fn builder_overrides() {
        let config = test_config()
            .with_algorithm(Algorithm::HS512)
            .with_access_token_ttl(Duration::from_secs(60))
            .with_rate_limit(5)
            .with_rate_limit_window(Duration::from_secs(1))
            .with_lockout_duration(Duration::from_secs(2));
        assert_eq!(config.algorithm(), Algorithm::HS512);
        assert_eq!(config.access_token_ttl(), Duration::from_secs(60));
        assert_eq!(config.rate_limit(), 5);
        assert_eq!(config.rate_limit_window(), Duration::from_secs(1));
        assert_eq!(config.lockout_duration(), Duration::from_secs(2));
    }

    #[test]
    fn from_env_requires_secret() {
        temp_env::with_var("GARDISTO_SECRET_KEY", None::<&str>, || {
            assert!(Config::from_env().is_err());
        });
        temp_env::with_var("GARDISTO_SECRET_KEY", Some(""), || {
            assert!(Config::from_env().is_err());
        });
    }

    #[test]
    fn from_env_reads_overrides() {
        temp_env::with_vars(
            [
                ("GARDISTO_SECRET_KEY", Some("from-env")),
                ("GARDISTO_ALGORITHM", Some("HS384")),
                ("GARDISTO_ACCESS_TOKEN_TTL_MINUTES", Some("5")),
                ("GARDISTO_REFRESH_TOKEN_TTL_DAYS", Some("1")),
                ("GARDISTO_RATE_LIMIT", Some("10")),
                ("GARDISTO_DATABASE_URL", Some("postgres://db:5432/auth")),
                ("GARDISTO_REDIS_URL", Some("redis://cache:6379/1")),
            ],
            || {
                let config = Config::from_env().expect("config should parse");
                assert_eq!(config.secret_key().expose_secret(), "from-env");
                assert_eq!(config.algorithm(), Algorithm::HS384);
                assert_eq!(config.access_token_ttl(), Duration::from_secs(5 * 60));
                assert_eq!(config.refresh_token_ttl(), Duration::from_secs(86_400));
                assert_eq!(config.rate_limit(), 10);
                assert_eq!(config.database_url(), "postgres://db:5432/auth");
                assert_eq!(config.redis_url(), "redis://cache:6379/1");
            },
        );
    }

    #[test]
    fn from_env_rejects_asymmetric_algorithms() {
        temp_env::with_vars(
            [
                ("GARDISTO_SECRET_KEY", Some("from-env")),
                ("GARDISTO_ALGORITHM", Some("RS256")),
            ],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }

    #[test]
    fn from_env_rejects_bad_numbers() {
        temp_env::with_vars(
            [
                ("GARDISTO_SECRET_KEY", Some("from-env")),
                ("GARDISTO_RATE_LIMIT", Some("not-a-number")),
            ],
            || {
                assert!(Config::from_env().is_err());
            },
        );
    }
}
