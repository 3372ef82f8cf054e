//! The exposed authentication contract.
//!
//! Flow Overview:
//! 1) `login`: rate limit, credential check, then a fresh token pair plus a
//!    durable session record and whitelist entry.
//! 2) `refresh`: rate limit, then one-time redemption through the rotation
//!    guard.
//! 3) `logout`: blacklist the access token and drop the principal's entire
//!    whitelist family.
//! 4) `authenticate`: verify the access token with context binding, check the
//!    lockout entry, and resolve the principal for protected endpoints.
//!
//! The transport layer stays outside this crate; it supplies a typed
//! [`RequestContext`] and maps [`AuthError`] kinds to wire status codes.

use axum::http::HeaderMap;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::AuthError;
use crate::kv::{keys, KeyValueStore};
use crate::principal::{CredentialVerifier, Principal, PrincipalDirectory};
use crate::rate_limit::{Decision, RateLimiter, RateScope};
use crate::rotation::RefreshRotationGuard;
use crate::session::SessionRegistry;
use crate::token::{TokenPair, TokenService, TokenType};

/// Typed request-scoped context supplied by the transport layer.
///
/// No ambient lookup: everything the security core needs from the request
/// travels in this struct.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub ip: String,
    pub user_agent: Option<String>,
    pub principal_id: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: None,
            principal_id: None,
        }
    }

    /// Build from request headers, honoring the trusted forwarded-for header.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, peer_addr: Option<&str>) -> Self {
        let user_agent = headers
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Self {
            ip: client_ip(headers, peer_addr),
            user_agent,
            principal_id: None,
        }
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Attach the authenticated principal, switching rate-limit scoping from
    /// address to identity.
    #[must_use]
    pub fn with_principal_id(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    fn rate_scope(&self) -> RateScope {
        match &self.principal_id {
            Some(id) => RateScope::Principal(id.clone()),
            None => RateScope::Ip(self.ip.clone()),
        }
    }
}

/// Client address for rate limiting and token binding: first entry of the
/// trusted forwarded-for header, else the peer address.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer_addr: Option<&str>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    peer_addr
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| "unknown".to_string(), str::to_string)
}

fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

fn valid_identifier(identifier: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(identifier))
}

pub struct AuthService {
    tokens: TokenService,
    guard: RefreshRotationGuard,
    limiter: RateLimiter,
    sessions: Arc<dyn SessionRegistry>,
    directory: Arc<dyn PrincipalDirectory>,
    credentials: Arc<dyn CredentialVerifier>,
    kv: Arc<dyn KeyValueStore>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: Config,
        kv: Arc<dyn KeyValueStore>,
        sessions: Arc<dyn SessionRegistry>,
        directory: Arc<dyn PrincipalDirectory>,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let tokens = TokenService::new(config.clone(), kv.clone());
        let guard = RefreshRotationGuard::new(
            config.clone(),
            tokens.clone(),
            kv.clone(),
            sessions.clone(),
            directory.clone(),
        );
        let limiter = RateLimiter::new(config.rate_limit(), config.rate_limit_window(), kv.clone());
        Self {
            tokens,
            guard,
            limiter,
            sessions,
            directory,
            credentials,
            kv,
        }
    }

    /// Wire the service to the stores of an [`AppContext`](crate::context::AppContext).
    #[must_use]
    pub fn from_context(
        context: &crate::context::AppContext,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let pool = context.pool().clone();
        Self::new(
            context.config().clone(),
            context.kv(),
            Arc::new(crate::session::PgSessionRegistry::new(pool.clone())),
            Arc::new(crate::principal::PgPrincipalDirectory::new(pool)),
            credentials,
        )
    }

    /// Exchange credentials for a token pair.
    ///
    /// Unknown identifiers, wrong secrets, and malformed identifiers are
    /// deliberately indistinguishable to the caller; internal logs tell them
    /// apart.
    ///
    /// # Errors
    ///
    /// `RateLimited` before any credential work; `InvalidCredentials`,
    /// `InactivePrincipal`, or `StoreUnavailable` afterwards.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        ctx: &RequestContext,
    ) -> Result<TokenPair, AuthError> {
        self.check_rate(ctx).await?;

        let identifier = normalize_identifier(identifier);
        if !valid_identifier(&identifier) {
            warn!("Login failed: malformed identifier");
            return Err(AuthError::InvalidCredentials);
        }

        let principal = self
            .directory
            .get_by_identifier(&identifier)
            .await
            .map_err(AuthError::store)?;
        let Some(principal) = principal else {
            warn!("Login failed: unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.credentials.verify(secret, &principal.credential_hash) {
            warn!("Login failed: bad secret for principal {}", principal.id);
            return Err(AuthError::InvalidCredentials);
        }

        if !principal.is_active {
            warn!("Login failed: principal {} is inactive", principal.id);
            return Err(AuthError::InactivePrincipal);
        }

        let access_token = self.tokens.issue_access_token(
            &principal.id,
            principal.role,
            Some(&ctx.ip),
            ctx.user_agent.as_deref(),
        )?;
        let refresh = self.tokens.issue_refresh_token(&principal.id).await?;

        self.sessions
            .create(
                &principal.id,
                &refresh.jti,
                refresh.expires_at,
                ctx.user_agent.as_deref(),
            )
            .await
            .map_err(AuthError::store)?;

        info!("Principal {} logged in", principal.id);

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }

    /// Redeem a refresh token for a new pair; one-time-use is enforced by the
    /// rotation guard.
    ///
    /// # Errors
    ///
    /// `RateLimited`, any verification failure, `ReuseDetected`,
    /// `InactivePrincipal`, or `StoreUnavailable`.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ctx: &RequestContext,
    ) -> Result<TokenPair, AuthError> {
        self.check_rate(ctx).await?;
        self.guard
            .rotate(refresh_token, &ctx.ip, ctx.user_agent.as_deref())
            .await
    }

    /// Invalidate an access token and the holder's entire refresh family.
    ///
    /// Any refresh token issued to the principal before this call will fail
    /// the whitelist check afterwards, which surfaces as reuse.
    ///
    /// # Errors
    ///
    /// Verification failures for the presented token, or `StoreUnavailable`.
    pub async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        let claims = self
            .tokens
            .verify(access_token, TokenType::Access, None, None)
            .await?;

        self.tokens.blacklist(&claims.jti, claims.exp).await?;
        let removed = self
            .kv
            .delete_matching(&keys::refresh_family(&claims.sub))
            .await?;

        info!(
            "Principal {} logged out, {removed} refresh entries removed",
            claims.sub
        );
        Ok(())
    }

    /// Resolve an access token into its principal, for use as middleware by
    /// protected endpoints.
    ///
    /// # Errors
    ///
    /// Verification failures, `Locked` during a lockout window,
    /// `InvalidCredentials` for a vanished principal, `InactivePrincipal`,
    /// or `StoreUnavailable`.
    pub async fn authenticate(
        &self,
        access_token: &str,
        ctx: &RequestContext,
    ) -> Result<Principal, AuthError> {
        let claims = self
            .tokens
            .verify(
                access_token,
                TokenType::Access,
                Some(&ctx.ip),
                ctx.user_agent.as_deref(),
            )
            .await?;

        if self.kv.exists(&keys::lockout(&claims.sub)).await? {
            return Err(AuthError::Locked);
        }

        let principal = self
            .directory
            .get_by_id(&claims.sub)
            .await
            .map_err(AuthError::store)?;
        let Some(principal) = principal else {
            warn!("Authenticated token for unknown principal {}", claims.sub);
            return Err(AuthError::InvalidCredentials);
        };

        if !principal.is_active {
            return Err(AuthError::InactivePrincipal);
        }

        Ok(principal)
    }

    async fn check_rate(&self, ctx: &RequestContext) -> Result<(), AuthError> {
        match self.limiter.admit(&ctx.rate_scope()).await {
            Decision::Allowed => Ok(()),
            Decision::Rejected { retry_after } => Err(AuthError::RateLimited { retry_after }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_ip_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        assert_eq!(client_ip(&headers, Some("9.9.9.9")), "1.2.3.4");
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some("9.9.9.9")), "9.9.9.9");
        assert_eq!(client_ip(&headers, None), "unknown");
    }

    #[test]
    fn client_ip_skips_empty_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("  "));
        assert_eq!(client_ip(&headers, Some("9.9.9.9")), "9.9.9.9");
    }

    #[test]
    fn request_context_builds_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        headers.insert("user-agent", HeaderValue::from_static("tests/1.0"));
        let ctx = RequestContext::from_headers(&headers, Some("9.9.9.9"));
        assert_eq!(ctx.ip, "1.2.3.4");
        assert_eq!(ctx.user_agent.as_deref(), Some("tests/1.0"));
        assert!(ctx.principal_id.is_none());
    }

    #[test]
    fn rate_scope_prefers_the_principal() {
        let ctx = RequestContext::new("1.2.3.4");
        assert_eq!(ctx.rate_scope(), RateScope::Ip("1.2.3.4".to_string()));

        let ctx = ctx.with_principal_id("user-1");
        assert_eq!(
            ctx.rate_scope(),
            RateScope::Principal("user-1".to_string())
        );
    }

    #[test]
    fn identifier_normalization_and_shape() {
        assert_eq!(
            normalize_identifier(" Reader@Example.COM "),
            "reader@example.com"
        );
        assert!(valid_identifier("reader@example.com"));
        assert!(!valid_identifier("not-an-email"));
        assert!(!valid_identifier("missing-domain@"));
    }
}
