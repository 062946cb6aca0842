//! Third-party service integration for TriggerMeNot.
//!
//! This crate provides:
//!
//! - **Credentials**: per (user, service) OAuth tokens and their store trait
//! - **OAuth**: token endpoint exchanges for Google and Microsoft
//! - **Token lifecycle**: always-valid access tokens with serialized refresh
//! - **Providers**: condition pollers for each trigger kind
//!
//! The authorization code exchange and [`TokenLifecycleManager::store_authorization`]
//! are not used by the engine binary. They serve the web layer that links a
//! user's service account.

pub mod credential;
pub mod error;
pub mod oauth;
pub mod provider;
pub mod token;

pub use credential::{Credential, CredentialStore};
pub use error::{CredentialError, OAuthError, ProviderError, TokenError};
pub use oauth::{
    GoogleOAuthConfig, MicrosoftOAuthConfig, OAuthClient, OAuthRefresher, OAuthTokens,
    TokenRefresher,
};
pub use provider::{ConditionResult, PollerSet, ProviderKind, ProviderPoller};
pub use token::{AccessToken, TokenLifecycleManager};

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
