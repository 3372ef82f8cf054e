//! Refresh-token rotation with reuse detection.
//!
//! Each whitelist entry moves through exactly one of two transitions:
//! consumed by the one rotation that wins the atomic take, or observed
//! absent, which is reuse. A legitimate client racing itself and an attacker
//! replaying a captured token are indistinguishable here, so both fail
//! closed: the account is locked, the presented jti is blacklisted, and
//! every durable session of the principal is revoked.

use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::error::AuthError;
use crate::kv::{keys, KeyValueStore};
use crate::principal::PrincipalDirectory;
use crate::session::SessionRegistry;
use crate::token::{TokenPair, TokenService, TokenType};

pub struct RefreshRotationGuard {
    config: Config,
    tokens: TokenService,
    kv: Arc<dyn KeyValueStore>,
    sessions: Arc<dyn SessionRegistry>,
    directory: Arc<dyn PrincipalDirectory>,
}

impl RefreshRotationGuard {
    #[must_use]
    pub fn new(
        config: Config,
        tokens: TokenService,
        kv: Arc<dyn KeyValueStore>,
        sessions: Arc<dyn SessionRegistry>,
        directory: Arc<dyn PrincipalDirectory>,
    ) -> Self {
        Self {
            config,
            tokens,
            kv,
            sessions,
            directory,
        }
    }

    /// Redeem a refresh token for a new access/refresh pair.
    ///
    /// The whitelist take is the only serialization point between racing
    /// callers presenting the same token: exactly one proceeds, the rest see
    /// reuse. A store failure during the take surfaces as `StoreUnavailable`
    /// and writes no lockout or blacklist state; only a completed reuse
    /// determination does that.
    ///
    /// # Errors
    ///
    /// Verification failures propagate unchanged; `ReuseDetected` when the
    /// whitelist entry is absent; `InactivePrincipal` when the subject is
    /// gone or disabled; `StoreUnavailable` on store failure.
    pub async fn rotate(
        &self,
        refresh_token: &str,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<TokenPair, AuthError> {
        let claims = self
            .tokens
            .verify(refresh_token, TokenType::Refresh, None, None)
            .await?;

        let whitelist_key = keys::refresh_whitelist(&claims.sub, &claims.jti);
        if self.kv.take(&whitelist_key).await?.is_none() {
            self.handle_reuse(&claims.sub, &claims.jti, claims.exp).await;
            return Err(AuthError::ReuseDetected);
        }

        let principal = self
            .directory
            .get_by_id(&claims.sub)
            .await
            .map_err(AuthError::store)?;
        let principal = match principal {
            Some(principal) if principal.is_active => principal,
            _ => return Err(AuthError::InactivePrincipal),
        };

        let access_token =
            self.tokens
                .issue_access_token(&principal.id, principal.role, Some(ip), user_agent)?;
        let refresh = self.tokens.issue_refresh_token(&principal.id).await?;

        self.sessions
            .create(&principal.id, &refresh.jti, refresh.expires_at, user_agent)
            .await
            .map_err(AuthError::store)?;

        info!("Rotated refresh token for principal {}", principal.id);

        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
        })
    }

    /// Fail-closed response to a spent or unknown refresh token.
    ///
    /// The determination is already made when this runs; punitive writes that
    /// fail are logged and do not soften the outcome.
    async fn handle_reuse(&self, principal_id: &str, jti: &str, expires_at_unix: i64) {
        error!(
            security_event = "refresh_reuse",
            principal_id, jti, "Refresh token reuse detected, locking principal"
        );

        if let Err(err) = self
            .kv
            .set_with_ttl(
                &keys::lockout(principal_id),
                "1",
                self.config.lockout_duration(),
            )
            .await
        {
            error!("Failed to write lockout for {principal_id}: {err}");
        }

        if let Err(err) = self.tokens.blacklist(jti, expires_at_unix).await {
            error!("Failed to blacklist reused jti {jti}: {err}");
        }

        if let Err(err) = self.sessions.revoke_all(principal_id).await {
            error!("Failed to revoke sessions for {principal_id}: {err}");
        }
    }
}
