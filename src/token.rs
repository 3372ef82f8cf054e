//! Token issuance and verification.
//!
//! Tokens are signed JWTs carrying the identity-binding claims described in
//! the data model: subject, role (access tokens only), type, a unique `jti`,
//! and the client IP / user agent observed at issuance. Verification never
//! mutates state; the only operation with a side effect is
//! [`TokenService::issue_refresh_token`], which must confirm the whitelist
//! write before the token is returned to anyone.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::error::AuthError;
use crate::kv::{keys, KeyValueStore};
use crate::principal::Role;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
        }
    }
}

/// Signed payload. Timestamps are unix seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type")]
    pub typ: TokenType,
    pub jti: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
}

/// A freshly minted refresh token plus the identifiers callers persist.
#[derive(Clone, Debug)]
pub struct IssuedRefresh {
    pub token: String,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

/// Access + refresh pair handed back on login and rotation.
#[derive(Clone, Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TokenService {
    config: Config,
    kv: Arc<dyn KeyValueStore>,
}

impl TokenService {
    #[must_use]
    pub fn new(config: Config, kv: Arc<dyn KeyValueStore>) -> Self {
        Self { config, kv }
    }

    /// Mint a signed access token bound to the observed client context.
    ///
    /// Pure apart from signing; performs no I/O.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if signing fails (practically unreachable
    /// with an HMAC key).
    pub fn issue_access_token(
        &self,
        principal_id: &str,
        role: Role,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.config.access_token_ttl().as_secs()).unwrap_or(i64::MAX);
        let claims = TokenClaims {
            sub: principal_id.to_string(),
            role: Some(role),
            typ: TokenType::Access,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: now.saturating_add(ttl),
            ip: ip.map(str::to_string),
            ua: user_agent.map(str::to_string),
        };
        self.sign(&claims)
    }

    /// Mint a signed refresh token and record its whitelist entry.
    ///
    /// The whitelist write is the side effect that makes the token
    /// redeemable; if it fails, no token is returned.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the whitelist write is not confirmed.
    pub async fn issue_refresh_token(
        &self,
        principal_id: &str,
    ) -> Result<IssuedRefresh, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.config.refresh_token_ttl().as_secs()).unwrap_or(i64::MAX);
        let expires_unix = now.saturating_add(ttl);
        let claims = TokenClaims {
            sub: principal_id.to_string(),
            role: None,
            typ: TokenType::Refresh,
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: expires_unix,
            ip: None,
            ua: None,
        };

        self.kv
            .set_with_ttl(
                &keys::refresh_whitelist(principal_id, &claims.jti),
                principal_id,
                self.config.refresh_token_ttl(),
            )
            .await?;

        let token = self.sign(&claims)?;
        let expires_at = DateTime::from_timestamp(expires_unix, 0)
            .unwrap_or_else(|| DateTime::<Utc>::MAX_UTC);

        Ok(IssuedRefresh {
            token,
            jti: claims.jti,
            expires_at,
        })
    }

    /// Decode and check a presented token.
    ///
    /// Checks run in a fixed order: signature and expiry, then the `jti`
    /// shape, the blacklist, the token type, and finally the transport
    /// context binding when the caller supplies one.
    ///
    /// # Errors
    ///
    /// `Expired`, `Malformed`, `Revoked`, `WrongType`, or `ContextMismatch`
    /// per the failed check; `StoreUnavailable` if the blacklist cannot be
    /// consulted.
    pub async fn verify(
        &self,
        token: &str,
        expected: TokenType,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<TokenClaims, AuthError> {
        let mut validation = Validation::new(self.config.algorithm());
        validation.leeway = 0;
        validation.validate_nbf = true;

        let key = DecodingKey::from_secret(self.config.secret_key().expose_secret().as_bytes());
        let decoded = decode::<TokenClaims>(token, &key, &validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    warn!("Token verification failed: {err}");
                    AuthError::Malformed
                }
            }
        })?;
        let claims = decoded.claims;

        if claims.jti.is_empty() {
            return Err(AuthError::Malformed);
        }

        if self.kv.exists(&keys::blacklist(&claims.jti)).await? {
            return Err(AuthError::Revoked);
        }

        if claims.typ != expected {
            return Err(AuthError::WrongType);
        }

        if let Some(ip) = ip {
            if claims.ip.as_deref() != Some(ip) {
                warn!(
                    "IP mismatch: token bound to {:?}, presented from {ip}",
                    claims.ip
                );
                return Err(AuthError::ContextMismatch);
            }
        }

        if let Some(user_agent) = user_agent {
            if claims.ua.as_deref() != Some(user_agent) {
                warn!(
                    "User agent mismatch: token bound to {:?}, presented as {user_agent}",
                    claims.ua
                );
                return Err(AuthError::ContextMismatch);
            }
        }

        Ok(claims)
    }

    /// Mark a `jti` unusable for the remainder of its signature validity.
    ///
    /// A token that has already expired naturally is left alone.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the blacklist write fails.
    pub async fn blacklist(&self, jti: &str, expires_at_unix: i64) -> Result<(), AuthError> {
        let remaining = expires_at_unix.saturating_sub(Utc::now().timestamp());
        let Ok(remaining) = u64::try_from(remaining) else {
            return Ok(());
        };
        if remaining == 0 {
            return Ok(());
        }
        self.kv
            .set_with_ttl(
                &keys::blacklist(jti),
                "1",
                std::time::Duration::from_secs(remaining),
            )
            .await?;
        Ok(())
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let key = EncodingKey::from_secret(self.config.secret_key().expose_secret().as_bytes());
        encode(&Header::new(self.config.algorithm()), claims, &key)
            .map_err(|err| AuthError::store(format!("token signing failed: {err}")))
    }
}
