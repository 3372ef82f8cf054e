//! # Gardisto (Bearer Token & Session Security Core)
//!
//! `gardisto` issues, verifies, rotates, and revokes the bearer tokens of an
//! API, and defends its login path from abuse. It is consumed by a transport
//! layer that maps the [`AuthError`] kinds to wire status codes; no routing
//! lives here.
//!
//! ## Token model
//!
//! Access tokens are short-lived signed JWTs carrying the subject, role, a
//! unique `jti`, and the client IP / user agent observed at issuance, which
//! binds them to the transport context they were minted under. Refresh
//! tokens are long-lived and redeemable exactly once: issuance writes a
//! whitelist entry in the key-value store, and rotation consumes it with a
//! single atomic take.
//!
//! ## Reuse detection
//!
//! A refresh token presented after its whitelist entry is gone (already
//! rotated, revoked at logout, or never issued) is treated as compromised.
//! The account is locked for a fixed window, the presented `jti` is
//! blacklisted, and every durable session of the principal is revoked.
//!
//! ## Stores
//!
//! Fast-expiring state (whitelist, blacklist, lockouts, rate-limit counters)
//! lives in Redis behind the [`kv::KeyValueStore`] trait; the durable session
//! audit trail lives in Postgres behind [`session::SessionRegistry`]. Both
//! are bounded-pool, bounded-timeout resources assembled once at startup in
//! an [`context::AppContext`]; there are no global singletons.

pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod kv;
pub mod principal;
pub mod rate_limit;
pub mod rotation;
pub mod session;
pub mod token;

pub use auth::{client_ip, AuthService, RequestContext};
pub use config::Config;
pub use context::AppContext;
pub use error::AuthError;
pub use principal::{CredentialVerifier, Principal, PrincipalDirectory, Role};
pub use rate_limit::{Decision, RateLimiter, RateScope};
pub use rotation::RefreshRotationGuard;
pub use session::{SessionRecord, SessionRegistry};
pub use token::{TokenClaims, TokenPair, TokenService, TokenType};
