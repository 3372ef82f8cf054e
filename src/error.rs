//! Closed error taxonomy for the security core.
//!
//! Every failure a caller can observe is one of these kinds; the transport
//! collaborator maps them to wire-level status codes with
//! [`AuthError::status_code`]. Client-facing text comes from
//! [`AuthError::client_message`], which deliberately collapses the
//! credential and token-verification kinds into uniform responses so the
//! login path cannot be used as an account oracle.

use axum::http::StatusCode;

use crate::kv::StoreError;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("principal is inactive")]
    InactivePrincipal,
    #[error("malformed token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
    #[error("unexpected token type")]
    WrongType,
    #[error("token context mismatch")]
    ContextMismatch,
    #[error("refresh token reuse detected")]
    ReuseDetected,
    #[error("principal temporarily locked")]
    Locked,
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl AuthError {
    /// Wrap a server-side store failure, keeping the source text for logs.
    pub(crate) fn store(err: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(err.to_string())
    }

    /// Status code the transport layer should answer with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::Malformed
            | Self::Expired
            | Self::Revoked
            | Self::WrongType
            | Self::ContextMismatch
            | Self::ReuseDetected => StatusCode::UNAUTHORIZED,
            Self::InactivePrincipal | Self::Locked => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Uniform client-facing text. Never distinguishes which credential or
    /// token check failed.
    #[must_use]
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials | Self::InactivePrincipal => {
                "incorrect username or password"
            }
            Self::Malformed
            | Self::Expired
            | Self::Revoked
            | Self::WrongType
            | Self::ContextMismatch
            | Self::ReuseDetected => "invalid or expired token",
            Self::Locked => "account temporarily locked",
            Self::RateLimited { .. } => "too many requests",
            Self::StoreUnavailable(_) => "service unavailable",
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unauthorized_kinds_map_to_401() {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::Malformed,
            AuthError::Expired,
            AuthError::Revoked,
            AuthError::WrongType,
            AuthError::ContextMismatch,
            AuthError::ReuseDetected,
        ] {
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn remaining_kinds_map_to_their_codes() {
        assert_eq!(
            AuthError::InactivePrincipal.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(AuthError::Locked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::RateLimited { retry_after: 1 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::StoreUnavailable("down".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn credential_failures_share_one_message() {
        assert_eq!(
            AuthError::InvalidCredentials.client_message(),
            AuthError::InactivePrincipal.client_message()
        );
    }

    #[test]
    fn token_failures_share_one_message() {
        let expected = AuthError::Malformed.client_message();
        for err in [
            AuthError::Expired,
            AuthError::Revoked,
            AuthError::WrongType,
            AuthError::ContextMismatch,
            AuthError::ReuseDetected,
        ] {
            assert_eq!(err.client_message(), expected);
        }
    }

    #[test]
    fn store_errors_convert() {
        let err: AuthError = StoreError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));
    }
}
