//! Provider pollers: condition checks against third-party services.
//!
//! Each trigger kind is served by one [`ProviderPoller`]. A poller owns the
//! typed settings schema for its kind, performs a single read against the
//! provider with a token handed to it, and reports whether the condition
//! fired. Pollers never persist anything themselves.

mod gmail;
mod outlook;

pub use gmail::{GMAIL_API_BASE, GmailSettings, GmailUnreadPoller};
pub use outlook::{GRAPH_API_BASE, OutlookSettings, OutlookUnreadPoller};

use crate::error::ProviderError;
use crate::token::AccessToken;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use triggermenot_core::ServiceKind;

/// Closed set of trigger kinds, persisted as the instance discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// New unread mail in a Gmail inbox.
    GmailUnread,
    /// Unread mail in an Outlook mail folder.
    OutlookUnread,
}

impl ProviderKind {
    /// All kinds.
    pub const ALL: [Self; 2] = [Self::GmailUnread, Self::OutlookUnread];

    /// Returns the service whose credential the poll needs.
    #[must_use]
    pub const fn service(&self) -> ServiceKind {
        match self {
            Self::GmailUnread => ServiceKind::Google,
            Self::OutlookUnread => ServiceKind::Microsoft,
        }
    }

    /// Returns the persisted discriminator.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GmailUnread => "gmail_unread",
            Self::OutlookUnread => "outlook_unread",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown trigger kind '{s}'"))
    }
}

/// Outcome of one condition check.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionResult {
    /// Whether the condition holds.
    pub fired: bool,
    /// Data handed to linked actions when fired.
    pub payload: JsonValue,
    /// New settings to persist before dispatching, for cursoring providers.
    pub settings_update: Option<JsonValue>,
}

impl ConditionResult {
    /// A negative result.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            fired: false,
            payload: JsonValue::Null,
            settings_update: None,
        }
    }

    /// A positive result carrying `payload`.
    #[must_use]
    pub fn fired(payload: JsonValue) -> Self {
        Self {
            fired: true,
            payload,
            settings_update: None,
        }
    }
}

/// Condition check for one trigger kind.
#[async_trait]
pub trait ProviderPoller: Send + Sync {
    /// The kind this poller serves.
    fn kind(&self) -> ProviderKind;

    /// Checks settings against the kind's schema and returns the cron
    /// expression they carry.
    fn validate_settings(&self, settings: &JsonValue) -> Result<String, Report<ProviderError>>;

    /// Performs one condition check.
    ///
    /// Failures are reported as `QueryFailed`, never as a negative result.
    async fn poll(
        &self,
        token: &AccessToken,
        settings: &JsonValue,
    ) -> Result<ConditionResult, Report<ProviderError>>;
}

/// Deserializes settings for `kind`, mapping failures to `InvalidSettings`.
pub(crate) fn parse_settings<T: serde::de::DeserializeOwned>(
    kind: ProviderKind,
    settings: &JsonValue,
) -> Result<T, ProviderError> {
    T::deserialize(settings).map_err(|e| ProviderError::InvalidSettings {
        provider: kind,
        reason: e.to_string(),
    })
}

/// Sends a provider GET and decodes a JSON body, mapping every failure to
/// `QueryFailed`.
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    kind: ProviderKind,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await.map_err(|e| ProviderError::QueryFailed {
        provider: kind,
        status: e.status().map(|s| s.as_u16()),
        reason: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::QueryFailed {
            provider: kind,
            status: Some(status.as_u16()),
            reason: body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::QueryFailed {
            provider: kind,
            status: Some(status.as_u16()),
            reason: format!("undecodable response: {e}"),
        })
}

/// Lookup table from trigger kind to its poller.
#[derive(Clone, Default)]
pub struct PollerSet {
    pollers: HashMap<ProviderKind, Arc<dyn ProviderPoller>>,
}

impl PollerSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the set of shipped pollers against the production APIs.
    #[must_use]
    pub fn standard(http: reqwest::Client) -> Self {
        Self::new()
            .with(Arc::new(GmailUnreadPoller::new(http.clone())))
            .with(Arc::new(OutlookUnreadPoller::new(http)))
    }

    /// Registers a poller under its kind, replacing any previous one.
    #[must_use]
    pub fn with(mut self, poller: Arc<dyn ProviderPoller>) -> Self {
        self.pollers.insert(poller.kind(), poller);
        self
    }

    /// Returns the poller for a kind.
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderPoller>> {
        self.pollers.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_services() {
        assert_eq!(ProviderKind::GmailUnread.service(), ServiceKind::Google);
        assert_eq!(ProviderKind::OutlookUnread.service(), ServiceKind::Microsoft);
    }

    #[test]
    fn discriminator_parses_back() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>(), Ok(kind));
        }
        assert!("slack_message".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn standard_set_serves_every_kind() {
        let set = PollerSet::standard(reqwest::Client::new());
        for kind in ProviderKind::ALL {
            assert_eq!(set.get(kind).map(|p| p.kind()), Some(kind));
        }
    }
}
