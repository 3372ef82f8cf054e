//! Principal lookup and credential verification contracts.
//!
//! The user directory is owned by the user-management service; this crate
//! only reads the fields the security core needs. Password hashing is a
//! black box behind [`CredentialVerifier`], so no hashing primitive lives
//! here.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::fmt;
use std::str::FromStr;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::User => write!(f, "user"),
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            other => Err(anyhow!("unknown role: {other}")),
        }
    }
}

/// Read-only view of a principal, as consumed by the security core.
#[derive(Clone, Debug)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub credential_hash: String,
}

#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Point lookup by opaque principal id.
    async fn get_by_id(&self, principal_id: &str) -> Result<Option<Principal>>;

    /// Lookup by the unique login identifier (email).
    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Principal>>;
}

/// Black-box password verification, owned by the hashing collaborator.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, secret: &str, credential_hash: &str) -> bool;
}

/// Directory backed by the `users` table.
#[derive(Clone)]
pub struct PgPrincipalDirectory {
    pool: PgPool,
}

impl PgPrincipalDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn principal_from_row(row: &sqlx::postgres::PgRow) -> Result<Principal> {
        let id: Uuid = row.get("id");
        let role: String = row.get("role");
        Ok(Principal {
            id: id.to_string(),
            email: row.get("email"),
            role: role.parse()?,
            is_active: row.get("is_active"),
            credential_hash: row.get("hashed_password"),
        })
    }
}

#[async_trait]
impl PrincipalDirectory for PgPrincipalDirectory {
    async fn get_by_id(&self, principal_id: &str) -> Result<Option<Principal>> {
        // Ids are opaque to callers; anything that is not a UUID cannot be in
        // this directory.
        let Ok(id) = Uuid::parse_str(principal_id) else {
            return Ok(None);
        };

        let query = "SELECT id, email, role, is_active, hashed_password FROM users WHERE id = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup principal by id")?;

        row.as_ref().map(Self::principal_from_row).transpose()
    }

    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Principal>> {
        let query =
            "SELECT id, email, role, is_active, hashed_password FROM users WHERE email = $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identifier)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup principal by identifier")?;

        row.as_ref().map(Self::principal_from_row).transpose()
    }
}
