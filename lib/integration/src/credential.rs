//! OAuth credentials per (user, service) and the store that holds them.
//!
//! Tokens never appear in `Debug` output so credentials can be logged
//! through tracing fields without leaking secrets.

use crate::error::CredentialError;
use crate::oauth::OAuthTokens;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use triggermenot_core::{ServiceKind, UserId};

/// Lifetime recorded for a refresh token when the provider does not say.
///
/// Informational only. Providers that never rotate keep accepting the token
/// long after this, so it never stops a refresh attempt.
pub const DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS: i64 = 90;

/// Lifetime assumed for an access token when the provider omits `expires_in`.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: i64 = 3600;

/// A stored OAuth credential.
///
/// At most one exists per (user, service).
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// The user who authorized the service.
    pub user_id: UserId,
    /// The authorized service.
    pub service: ServiceKind,
    /// The user's id on the provider side, when known.
    pub service_user_id: Option<String>,
    /// Current access token.
    pub access_token: String,
    /// When the access token stops being accepted.
    pub access_token_expires_at: DateTime<Utc>,
    /// Current refresh token. One-time use on providers that rotate.
    pub refresh_token: String,
    /// Expected end of the refresh token's life. The provider decides; the
    /// exchange is attempted regardless.
    pub refresh_token_expires_at: DateTime<Utc>,
    /// When the row was last written.
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Builds a credential from the result of an authorization code exchange.
    ///
    /// Returns `None` when the provider issued no refresh token, since such
    /// a credential could never be renewed by the engine.
    #[must_use]
    pub fn from_authorization(
        user_id: UserId,
        service: ServiceKind,
        service_user_id: Option<String>,
        tokens: OAuthTokens,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        let refresh_token = tokens.refresh_token?;
        Some(Self {
            user_id,
            service,
            service_user_id,
            access_token: tokens.access_token,
            access_token_expires_at: now + access_lifetime(tokens.expires_in),
            refresh_token,
            refresh_token_expires_at: now + Duration::days(DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS),
            updated_at: now,
        })
    }

    /// Returns whether the access token is still usable at `now`.
    #[must_use]
    pub fn access_token_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.access_token_expires_at
    }

    /// Applies the result of a refresh grant.
    ///
    /// A rotated refresh token restarts its lifetime; when the provider
    /// keeps the old one, its expiry is left as is.
    pub fn apply_refresh(&mut self, tokens: OAuthTokens, now: DateTime<Utc>) {
        self.access_token = tokens.access_token;
        self.access_token_expires_at = now + access_lifetime(tokens.expires_in);
        if let Some(rotated) = tokens.refresh_token {
            self.refresh_token = rotated;
            self.refresh_token_expires_at =
                now + Duration::days(DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS);
        }
        self.updated_at = now;
    }
}

fn access_lifetime(expires_in: Option<std::time::Duration>) -> Duration {
    expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .unwrap_or_else(|| Duration::seconds(DEFAULT_ACCESS_TOKEN_LIFETIME_SECS))
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("service", &self.service)
            .field("service_user_id", &self.service_user_id)
            .field("access_token", &"<redacted>")
            .field("access_token_expires_at", &self.access_token_expires_at)
            .field("refresh_token", &"<redacted>")
            .field("refresh_token_expires_at", &self.refresh_token_expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Durable storage for credentials.
///
/// Implementations must enforce uniqueness of (user, service) so that
/// `upsert` replaces the existing row.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the credential for a (user, service) pair.
    async fn get(
        &self,
        user_id: UserId,
        service: ServiceKind,
    ) -> Result<Option<Credential>, CredentialError>;

    /// Inserts or replaces the credential for its (user, service) pair.
    async fn upsert(&self, credential: &Credential) -> Result<(), CredentialError>;
}
