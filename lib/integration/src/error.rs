//! Error types for the integration crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `CredentialError`: credential store reads and writes
//! - `OAuthError`: token endpoint exchanges (code and refresh grants)
//! - `TokenError`: outcome of asking for a valid access token
//! - `ProviderError`: provider settings validation and condition polling

use crate::provider::ProviderKind;
use std::fmt;
use triggermenot_core::{ServiceKind, UserId};

/// Errors from credential store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The stored row could not be decoded.
    InvalidFormat { reason: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidFormat { reason } => {
                write!(f, "invalid credential format: {reason}")
            }
            Self::StorageFailed { reason } => {
                write!(f, "credential storage failed: {reason}")
            }
        }
    }
}

impl std::error::Error for CredentialError {}

/// Errors from OAuth token endpoint exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    /// No client credentials are configured for the service.
    NotConfigured { service: ServiceKind },
    /// Client configuration is invalid (bad URL, ...).
    Configuration { reason: String },
    /// The token endpoint answered with an OAuth error (e.g. `invalid_grant`).
    Rejected { service: ServiceKind, reason: String },
    /// The exchange failed before a usable answer came back.
    Transport { service: ServiceKind, reason: String },
}

impl fmt::Display for OAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured { service } => {
                write!(f, "oauth is not configured for {service}")
            }
            Self::Configuration { reason } => {
                write!(f, "oauth configuration error: {reason}")
            }
            Self::Rejected { service, reason } => {
                write!(f, "{service} token endpoint rejected the request: {reason}")
            }
            Self::Transport { service, reason } => {
                write!(f, "{service} token exchange failed: {reason}")
            }
        }
    }
}

impl std::error::Error for OAuthError {}

/// Errors from resolving a valid access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The user has not authorized the service.
    CredentialNotFound { user_id: UserId, service: ServiceKind },
    /// The access token was expired and could not be refreshed.
    RefreshFailed {
        user_id: UserId,
        service: ServiceKind,
        reason: String,
    },
    /// Reading or persisting the credential failed.
    Storage { reason: String },
}

impl TokenError {
    /// Returns true when the service simply is not authorized.
    ///
    /// This is an expected state and callers skip the cycle silently.
    #[must_use]
    pub fn is_not_authorized(&self) -> bool {
        matches!(self, Self::CredentialNotFound { .. })
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialNotFound { user_id, service } => {
                write!(f, "no {service} credential for user {user_id}")
            }
            Self::RefreshFailed {
                user_id,
                service,
                reason,
            } => {
                write!(
                    f,
                    "token refresh failed for user {user_id} on {service}: {reason}"
                )
            }
            Self::Storage { reason } => write!(f, "credential storage error: {reason}"),
        }
    }
}

impl std::error::Error for TokenError {}

impl From<CredentialError> for TokenError {
    fn from(e: CredentialError) -> Self {
        Self::Storage {
            reason: e.to_string(),
        }
    }
}

/// Errors from provider pollers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The trigger settings do not match the provider's schema.
    InvalidSettings {
        provider: ProviderKind,
        reason: String,
    },
    /// The poll request failed or returned a non-success answer.
    QueryFailed {
        provider: ProviderKind,
        status: Option<u16>,
        reason: String,
    },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSettings { provider, reason } => {
                write!(f, "invalid {provider} settings: {reason}")
            }
            Self::QueryFailed {
                provider,
                status: Some(status),
                reason,
            } => {
                write!(f, "{provider} query failed with status {status}: {reason}")
            }
            Self::QueryFailed {
                provider,
                status: None,
                reason,
            } => {
                write!(f, "{provider} query failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ProviderError {}
