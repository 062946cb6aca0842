//! In-memory doubles for the integration seams.
//!
//! Enabled for this crate's tests and, through the `test-util` feature, for
//! downstream crates that drive the token lifecycle in their own tests.

use crate::credential::{Credential, CredentialStore};
use crate::error::{CredentialError, OAuthError};
use crate::oauth::{OAuthTokens, TokenRefresher};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use triggermenot_core::{ServiceKind, UserId};

/// Credential store backed by a map.
#[derive(Default)]
pub struct MemoryCredentialStore {
    rows: Mutex<HashMap<(UserId, ServiceKind), Credential>>,
    reads: AtomicUsize,
    upsert_delay: std::time::Duration,
}

impl MemoryCredentialStore {
    /// Makes every `upsert` wait before writing, like a slow database.
    #[must_use]
    pub fn with_upsert_delay(mut self, delay: std::time::Duration) -> Self {
        self.upsert_delay = delay;
        self
    }

    pub fn insert(&self, credential: Credential) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((credential.user_id, credential.service), credential);
    }

    pub fn row(&self, user_id: UserId, service: ServiceKind) -> Option<Credential> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(user_id, service))
            .cloned()
    }

    /// Number of `get` calls served.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(
        &self,
        user_id: UserId,
        service: ServiceKind,
    ) -> Result<Option<Credential>, CredentialError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.row(user_id, service))
    }

    async fn upsert(&self, credential: &Credential) -> Result<(), CredentialError> {
        if !self.upsert_delay.is_zero() {
            tokio::time::sleep(self.upsert_delay).await;
        }
        self.insert(credential.clone());
        Ok(())
    }
}

/// Refresher that counts exchanges and answers with a fixed outcome.
///
/// The n-th successful exchange issues access token `access-n`.
pub struct FakeRefresher {
    calls: AtomicUsize,
    rotate: bool,
    fail: bool,
    delay: std::time::Duration,
}

impl FakeRefresher {
    /// Succeeds and rotates the refresh token.
    pub fn rotating() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            rotate: true,
            fail: false,
            delay: std::time::Duration::ZERO,
        }
    }

    /// Succeeds and keeps the refresh token.
    pub fn non_rotating() -> Self {
        Self {
            rotate: false,
            ..Self::rotating()
        }
    }

    /// Fails as a revoked refresh token would.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::rotating()
        }
    }

    /// Waits before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of exchanges attempted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for FakeRefresher {
    async fn refresh(
        &self,
        service: ServiceKind,
        refresh_token: &str,
    ) -> Result<OAuthTokens, Report<OAuthError>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(OAuthError::Rejected {
                service,
                reason: "invalid_grant".to_string(),
            }
            .into());
        }
        Ok(OAuthTokens {
            access_token: format!("access-{n}"),
            refresh_token: self.rotate.then(|| format!("{refresh_token}-rotated")),
            expires_in: Some(std::time::Duration::from_secs(3600)),
        })
    }
}

/// A credential with access token `stored-access` and refresh token `r1`.
///
/// The access token is already expired when `expired` is set; the refresh
/// token is valid for another 30 days either way.
pub fn credential(user_id: UserId, service: ServiceKind, expired: bool) -> Credential {
    let now = Utc::now();
    let access_offset = if expired {
        -Duration::minutes(5)
    } else {
        Duration::minutes(30)
    };
    Credential {
        user_id,
        service,
        service_user_id: None,
        access_token: "stored-access".to_string(),
        access_token_expires_at: now + access_offset,
        refresh_token: "r1".to_string(),
        refresh_token_expires_at: now + Duration::days(30),
        updated_at: now,
    }
}
