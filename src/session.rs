//! Durable registry of issued refresh sessions.
//!
//! One row per refresh token, written at issuance and flipped to revoked on
//! explicit or administrative revocation. Rows are never hard-deleted; the
//! table is the audit source of truth, not the enforcement path, and
//! immediate invalidation always goes through the key-value whitelist and
//! blacklist.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct SessionRecord {
    pub id: Uuid,
    pub principal_id: String,
    pub refresh_jti: String,
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device_info: Option<String>,
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Record a freshly issued refresh session.
    async fn create(
        &self,
        principal_id: &str,
        refresh_jti: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<&str>,
    ) -> Result<()>;

    /// Point lookup by refresh jti, for audit and debugging.
    async fn get(&self, refresh_jti: &str) -> Result<Option<SessionRecord>>;

    /// Mark one session revoked. Leaves the whitelist untouched.
    async fn revoke(&self, refresh_jti: &str) -> Result<()>;

    /// Mark every session of a principal revoked.
    async fn revoke_all(&self, principal_id: &str) -> Result<()>;
}

/// Registry backed by the `user_sessions` table.
#[derive(Clone)]
pub struct PgSessionRegistry {
    pool: PgPool,
}

impl PgSessionRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRegistry for PgSessionRegistry {
    async fn create(
        &self,
        principal_id: &str,
        refresh_jti: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<&str>,
    ) -> Result<()> {
        let user_id =
            Uuid::parse_str(principal_id).context("principal id is not a valid session owner")?;

        let query = r"
            INSERT INTO user_sessions (user_id, refresh_jti, expires_at, device_info)
            VALUES ($1, $2, $3, $4)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(refresh_jti)
            .bind(expires_at)
            .bind(device_info)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert session record")?;
        Ok(())
    }

    async fn get(&self, refresh_jti: &str) -> Result<Option<SessionRecord>> {
        let query = r"
            SELECT id, user_id, refresh_jti, is_revoked, created_at, expires_at, device_info
            FROM user_sessions
            WHERE refresh_jti = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(refresh_jti)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup session record")?;

        Ok(row.map(|row| {
            let user_id: Uuid = row.get("user_id");
            SessionRecord {
                id: row.get("id"),
                principal_id: user_id.to_string(),
                refresh_jti: row.get("refresh_jti"),
                is_revoked: row.get("is_revoked"),
                created_at: row.get("created_at"),
                expires_at: row.get("expires_at"),
                device_info: row.get("device_info"),
            }
        }))
    }

    async fn revoke(&self, refresh_jti: &str) -> Result<()> {
        let query = "UPDATE user_sessions SET is_revoked = TRUE WHERE refresh_jti = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(refresh_jti)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke session record")?;
        Ok(())
    }

    async fn revoke_all(&self, principal_id: &str) -> Result<()> {
        let Ok(user_id) = Uuid::parse_str(principal_id) else {
            return Ok(());
        };

        let query = "UPDATE user_sessions SET is_revoked = TRUE WHERE user_id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke session records")?;
        Ok(())
    }
}

/// In-memory registry for tests and single-process embedding.
#[derive(Debug, Default)]
pub struct MemorySessionRegistry {
    records: Mutex<HashMap<String, SessionRecord>>,
}

impl MemorySessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn create(
        &self,
        principal_id: &str,
        refresh_jti: &str,
        expires_at: DateTime<Utc>,
        device_info: Option<&str>,
    ) -> Result<()> {
        let mut records = self.records.lock().expect("registry lock poisoned");
        records.insert(
            refresh_jti.to_string(),
            SessionRecord {
                id: Uuid::new_v4(),
                principal_id: principal_id.to_string(),
                refresh_jti: refresh_jti.to_string(),
                is_revoked: false,
                created_at: Utc::now(),
                expires_at,
                device_info: device_info.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn get(&self, refresh_jti: &str) -> Result<Option<SessionRecord>> {
        let records = self.records.lock().expect("registry lock poisoned");
        Ok(records.get(refresh_jti).cloned())
    }

    async fn revoke(&self, refresh_jti: &str) -> Result<()> {
        let mut records = self.records.lock().expect("registry lock poisoned");
        if let Some(record) = records.get_mut(refresh_jti) {
            record.is_revoked = true;
        }
        Ok(())
    }

    async fn revoke_all(&self, principal_id: &str) -> Result<()> {
        let mut records = self.records.lock().expect("registry lock poisoned");
        for record in records.values_mut() {
            if record.principal_id == principal_id {
                record.is_revoked = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_registry_tracks_lifecycle() {
        let registry = MemorySessionRegistry::new();
        let expires_at = Utc::now() + chrono::Duration::days(7);
        registry
            .create("user-1", "jti-1", expires_at, Some("tests/1.0"))
            .await
            .unwrap();
        registry
            .create("user-1", "jti-2", expires_at, None)
            .await
            .unwrap();
        registry
            .create("user-2", "jti-3", expires_at, None)
            .await
            .unwrap();

        let record = registry.get("jti-1").await.unwrap().unwrap();
        assert_eq!(record.principal_id, "user-1");
        assert_eq!(record.device_info.as_deref(), Some("tests/1.0"));
        assert!(!record.is_revoked);

        registry.revoke("jti-1").await.unwrap();
        assert!(registry.get("jti-1").await.unwrap().unwrap().is_revoked);
        assert!(!registry.get("jti-2").await.unwrap().unwrap().is_revoked);

        registry.revoke_all("user-1").await.unwrap();
        assert!(registry.get("jti-2").await.unwrap().unwrap().is_revoked);
        assert!(!registry.get("jti-3").await.unwrap().unwrap().is_revoked);
    }

    #[tokio::test]
    async fn memory_registry_get_misses_cleanly() {
        let registry = MemorySessionRegistry::new();
        assert!(registry.get("missing").await.unwrap().is_none());
    }
}
