//! Access token lifecycle.
//!
//! [`TokenLifecycleManager`] hands out access tokens that are valid at the
//! moment of the call, refreshing and persisting them when they have
//! expired. Refreshes for the same (user, service) are serialized so a
//! rotating refresh token is only ever spent once.
//!
//! The exchange and the write of its result run on their own task. A caller
//! dropped by a timeout mid-refresh leaves that task running, so a token the
//! provider has already rotated is still persisted.

use crate::credential::{Credential, CredentialStore};
use crate::error::TokenError;
use crate::oauth::{OAuthTokens, TokenRefresher};
use chrono::Utc;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{Instrument, debug, info, instrument, warn};
use triggermenot_core::{ServiceKind, UserId};

/// A bearer token valid at the time it was handed out.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for an `Authorization` header.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

type RefreshLock = Arc<tokio::sync::Mutex<()>>;

/// Keeps stored OAuth credentials usable.
pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    refresh_locks: Mutex<HashMap<(UserId, ServiceKind), RefreshLock>>,
}

impl TokenLifecycleManager {
    /// Creates a manager over a credential store and refresh exchange.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns an access token valid now for the user's service.
    ///
    /// A stored token that has not expired is returned without any network
    /// call. Otherwise the refresh grant runs, the credential is persisted
    /// with the new tokens, and the new access token is returned.
    ///
    /// # Errors
    ///
    /// - `CredentialNotFound` when the user never authorized the service.
    /// - `RefreshFailed` when the provider rejects the refresh token or the
    ///   exchange fails.
    /// - `Storage` when the credential cannot be read or written.
    #[instrument(skip(self), fields(user_id = %user_id, service = %service))]
    pub async fn get_valid_token(
        &self,
        user_id: UserId,
        service: ServiceKind,
    ) -> Result<AccessToken, Report<TokenError>> {
        let credential = self.load(user_id, service).await?;
        if credential.access_token_valid_at(Utc::now()) {
            return Ok(AccessToken(credential.access_token));
        }

        let guard = self.refresh_lock(user_id, service).lock_owned().await;

        // A queued caller finds the credential another caller just refreshed.
        let mut credential = self.load(user_id, service).await?;
        if credential.access_token_valid_at(Utc::now()) {
            debug!("credential refreshed by a concurrent caller");
            return Ok(AccessToken(credential.access_token));
        }

        let store = Arc::clone(&self.store);
        let refresher = Arc::clone(&self.refresher);
        let refresh = tokio::spawn(
            async move {
                // Held until the new tokens are stored.
                let _guard = guard;
                let tokens = refresher
                    .refresh(service, &credential.refresh_token)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "token refresh exchange failed");
                        TokenError::RefreshFailed {
                            user_id,
                            service,
                            reason: e.current_context().to_string(),
                        }
                    })?;

                credential.apply_refresh(tokens, Utc::now());
                store.upsert(&credential).await.map_err(TokenError::from)?;
                Ok::<_, Report<TokenError>>(credential)
            }
            .in_current_span(),
        );

        let credential = refresh.await.map_err(|e| TokenError::RefreshFailed {
            user_id,
            service,
            reason: format!("refresh task failed: {e}"),
        })??;

        info!("access token refreshed");
        Ok(AccessToken(credential.access_token))
    }

    /// Persists the tokens from an initial authorization code exchange.
    ///
    /// Replaces any credential the user already had for the service. The
    /// engine never links services itself; this is the entry point for the
    /// web layer after [`OAuthClient::exchange_code`].
    ///
    /// [`OAuthClient::exchange_code`]: crate::OAuthClient::exchange_code
    ///
    /// # Errors
    ///
    /// Returns `RefreshFailed` when the provider issued no refresh token and
    /// `Storage` when the upsert fails.
    #[instrument(skip(self, tokens), fields(user_id = %user_id, service = %service))]
    pub async fn store_authorization(
        &self,
        user_id: UserId,
        service: ServiceKind,
        service_user_id: Option<String>,
        tokens: OAuthTokens,
    ) -> Result<Credential, Report<TokenError>> {
        let credential =
            Credential::from_authorization(user_id, service, service_user_id, tokens, Utc::now())
                .ok_or_else(|| TokenError::RefreshFailed {
                    user_id,
                    service,
                    reason: "authorization returned no refresh token".to_string(),
                })?;

        let lock = self.refresh_lock(user_id, service);
        let _guard = lock.lock().await;
        self.store.upsert(&credential).await.map_err(TokenError::from)?;

        info!("service authorization stored");
        Ok(credential)
    }

    async fn load(
        &self,
        user_id: UserId,
        service: ServiceKind,
    ) -> Result<Credential, Report<TokenError>> {
        let credential = self
            .store
            .get(user_id, service)
            .await
            .map_err(TokenError::from)?;
        credential.ok_or_else(|| TokenError::CredentialNotFound { user_id, service }.into())
    }

    fn refresh_lock(&self, user_id: UserId, service: ServiceKind) -> RefreshLock {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry((user_id, service)).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRefresher, MemoryCredentialStore, credential};
    use chrono::Duration;

    fn manager(
        store: &Arc<MemoryCredentialStore>,
        refresher: &Arc<FakeRefresher>,
    ) -> TokenLifecycleManager {
        TokenLifecycleManager::new(store.clone(), refresher.clone())
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let user_id = UserId::new();
        let store = Arc::new(MemoryCredentialStore::default());
        store.insert(credential(user_id, ServiceKind::Google, false));
        let refresher = Arc::new(FakeRefresher::rotating());

        let token = manager(&store, &refresher)
            .get_valid_token(user_id, ServiceKind::Google)
            .await
            .expect("token");

        assert_eq!(token.secret(), "stored-access");
        assert_eq!(refresher.calls(), 0);
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_persisted() {
        let user_id = UserId::new();
        let store = Arc::new(MemoryCredentialStore::default());
        store.insert(credential(user_id, ServiceKind::Microsoft, true));
        let refresher = Arc::new(FakeRefresher::rotating());

        let token = manager(&store, &refresher)
            .get_valid_token(user_id, ServiceKind::Microsoft)
            .await
            .expect("token");

        assert_eq!(token.secret(), "access-1");
        let row = store.row(user_id, ServiceKind::Microsoft).expect("row");
        assert_eq!(row.access_token, "access-1");
        assert_eq!(row.refresh_token, "r1-rotated");
        assert!(row.access_token_valid_at(Utc::now()));
    }

    #[tokio::test]
    async fn provider_without_rotation_keeps_refresh_token() {
        let user_id = UserId::new();
        let store = Arc::new(MemoryCredentialStore::default());
        store.insert(credential(user_id, ServiceKind::Google, true));
        let refresher = Arc::new(FakeRefresher::non_rotating());

        manager(&store, &refresher)
            .get_valid_token(user_id, ServiceKind::Google)
            .await
            .expect("token");

        let row = store.row(user_id, ServiceKind::Google).expect("row");
        assert_eq!(row.refresh_token, "r1");
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let user_id = UserId::new();
        let store = Arc::new(MemoryCredentialStore::default());
        store.insert(credential(user_id, ServiceKind::Microsoft, true));
        let refresher =
            Arc::new(FakeRefresher::rotating().with_delay(std::time::Duration::from_millis(50)));
        let manager = Arc::new(manager(&store, &refresher));

        let calls = (0..8).map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .get_valid_token(user_id, ServiceKind::Microsoft)
                    .await
            })
        });
        let results = futures::future::join_all(calls).await;

        for result in results {
            let token = result.expect("join").expect("token");
            assert_eq!(token.secret(), "access-1");
        }
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn missing_credential_is_reported() {
        let store = Arc::new(MemoryCredentialStore::default());
        let refresher = Arc::new(FakeRefresher::rotating());

        let err = manager(&store, &refresher)
            .get_valid_token(UserId::new(), ServiceKind::Google)
            .await
            .err()
            .expect("should fail");

        assert!(err.current_context().is_not_authorized());
    }

    #[tokio::test]
    async fn rejected_refresh_leaves_credential_untouched() {
        let user_id = UserId::new();
        let store = Arc::new(MemoryCredentialStore::default());
        let original = credential(user_id, ServiceKind::Google, true);
        store.insert(original.clone());
        let refresher = Arc::new(FakeRefresher::failing());

        let err = manager(&store, &refresher)
            .get_valid_token(user_id, ServiceKind::Google)
            .await
            .err()
            .expect("should fail");

        match err.current_context() {
            TokenError::RefreshFailed {
                user_id: failed_user,
                service,
                reason,
            } => {
                assert_eq!(*failed_user, user_id);
                assert_eq!(*service, ServiceKind::Google);
                assert!(reason.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.row(user_id, ServiceKind::Google), Some(original));
    }

    #[tokio::test]
    async fn refresh_token_past_recorded_lifetime_is_still_exchanged() {
        // Authorized 91 days ago; Google never rotates its refresh tokens.
        let user_id = UserId::new();
        let store = Arc::new(MemoryCredentialStore::default());
        let mut old = credential(user_id, ServiceKind::Google, true);
        old.refresh_token_expires_at = Utc::now() - Duration::days(1);
        store.insert(old);
        let refresher = Arc::new(FakeRefresher::non_rotating());

        let token = manager(&store, &refresher)
            .get_valid_token(user_id, ServiceKind::Google)
            .await
            .expect("token");

        assert_eq!(token.secret(), "access-1");
        assert_eq!(refresher.calls(), 1);
        let row = store.row(user_id, ServiceKind::Google).expect("row");
        assert_eq!(row.refresh_token, "r1");
        assert_eq!(row.access_token, "access-1");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_caller_still_persists_rotated_token() {
        let user_id = UserId::new();
        let store = Arc::new(
            MemoryCredentialStore::default()
                .with_upsert_delay(std::time::Duration::from_secs(5)),
        );
        store.insert(credential(user_id, ServiceKind::Microsoft, true));
        let refresher = Arc::new(FakeRefresher::rotating());
        let manager = manager(&store, &refresher);

        let abandoned = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            manager.get_valid_token(user_id, ServiceKind::Microsoft),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(refresher.calls(), 1);

        // The next caller waits for the in-flight write instead of spending
        // the old refresh token again.
        let token = manager
            .get_valid_token(user_id, ServiceKind::Microsoft)
            .await
            .expect("token");

        assert_eq!(token.secret(), "access-1");
        assert_eq!(refresher.calls(), 1);
        let row = store.row(user_id, ServiceKind::Microsoft).expect("row");
        assert_eq!(row.refresh_token, "r1-rotated");
    }

    #[tokio::test]
    async fn authorization_replaces_existing_credential() {
        let user_id = UserId::new();
        let store = Arc::new(MemoryCredentialStore::default());
        store.insert(credential(user_id, ServiceKind::Microsoft, true));
        let refresher = Arc::new(FakeRefresher::rotating());

        manager(&store, &refresher)
            .store_authorization(
                user_id,
                ServiceKind::Microsoft,
                Some("ms-42".to_string()),
                OAuthTokens {
                    access_token: "fresh".to_string(),
                    refresh_token: Some("r9".to_string()),
                    expires_in: Some(std::time::Duration::from_secs(3600)),
                },
            )
            .await
            .expect("stored");

        let row = store.row(user_id, ServiceKind::Microsoft).expect("row");
        assert_eq!(row.access_token, "fresh");
        assert_eq!(row.refresh_token, "r9");
        assert_eq!(row.service_user_id.as_deref(), Some("ms-42"));
    }
}
