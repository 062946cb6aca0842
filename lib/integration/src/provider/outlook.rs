//! Outlook unread-mail trigger via Microsoft Graph.

use super::{ConditionResult, ProviderKind, ProviderPoller, get_json, parse_settings};
use crate::error::ProviderError;
use crate::token::AccessToken;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument};

/// Microsoft Graph v1.0 base URL.
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Settings of an `outlook_unread` trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutlookSettings {
    pub cron: String,
    /// Mail folder id or well-known name.
    #[serde(default = "default_folder")]
    pub folder: String,
}

fn default_folder() -> String {
    "inbox".to_string()
}

/// Parses settings and checks the folder is a single path segment.
///
/// Well-known names and Graph folder ids only use `[A-Za-z0-9_=-]`.
fn outlook_settings(settings: &JsonValue) -> Result<OutlookSettings, Report<ProviderError>> {
    let settings: OutlookSettings = parse_settings(ProviderKind::OutlookUnread, settings)?;
    let segment_safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '-');
    if settings.folder.is_empty() || !settings.folder.chars().all(segment_safe) {
        return Err(ProviderError::InvalidSettings {
            provider: ProviderKind::OutlookUnread,
            reason: format!("invalid folder '{}'", settings.folder),
        }
        .into());
    }
    Ok(settings)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailFolder {
    #[serde(default)]
    display_name: Option<String>,
    unread_item_count: u64,
}

/// Fires while the folder has unread items.
pub struct OutlookUnreadPoller {
    http: reqwest::Client,
    base_url: String,
}

impl OutlookUnreadPoller {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, GRAPH_API_BASE)
    }

    #[must_use]
    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderPoller for OutlookUnreadPoller {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OutlookUnread
    }

    fn validate_settings(&self, settings: &JsonValue) -> Result<String, Report<ProviderError>> {
        Ok(outlook_settings(settings)?.cron)
    }

    #[instrument(skip_all, fields(provider = %self.kind()))]
    async fn poll(
        &self,
        token: &AccessToken,
        settings: &JsonValue,
    ) -> Result<ConditionResult, Report<ProviderError>> {
        let settings = outlook_settings(settings)?;

        let request = self
            .http
            .get(format!("{}/me/mailFolders/{}", self.base_url, settings.folder))
            .bearer_auth(token.secret());
        let folder: MailFolder = get_json(self.kind(), request).await?;

        debug!(unread = folder.unread_item_count, "outlook folder evaluated");
        if folder.unread_item_count == 0 {
            return Ok(ConditionResult::quiet());
        }

        Ok(ConditionResult::fired(json!({
            "unread": folder.unread_item_count,
            "folder": settings.folder,
            "folder_name": folder.display_name,
        })))
    }
}
