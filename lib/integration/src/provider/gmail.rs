//! Gmail unread-mail trigger.

use super::{ConditionResult, ProviderKind, ProviderPoller, get_json, parse_settings};
use crate::error::ProviderError;
use crate::token::AccessToken;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tracing::{debug, instrument};

/// Gmail REST API base URL.
pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

const DEFAULT_QUERY: &str = "is:unread in:inbox";

/// Settings of a `gmail_unread` trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GmailSettings {
    pub cron: String,
    /// Gmail search query; defaults to unread mail in the inbox.
    #[serde(default = "default_query")]
    pub query: String,
}

fn default_query() -> String {
    DEFAULT_QUERY.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageList {
    #[serde(default)]
    result_size_estimate: u64,
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// Fires while the Gmail search query matches at least one message.
pub struct GmailUnreadPoller {
    http: reqwest::Client,
    base_url: String,
}

impl GmailUnreadPoller {
    /// Creates a poller against the production Gmail API.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, GMAIL_API_BASE)
    }

    /// Creates a poller against another API base URL.
    #[must_use]
    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderPoller for GmailUnreadPoller {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GmailUnread
    }

    fn validate_settings(&self, settings: &JsonValue) -> Result<String, Report<ProviderError>> {
        let settings: GmailSettings = parse_settings(self.kind(), settings)?;
        Ok(settings.cron)
    }

    #[instrument(skip_all, fields(provider = %self.kind()))]
    async fn poll(
        &self,
        token: &AccessToken,
        settings: &JsonValue,
    ) -> Result<ConditionResult, Report<ProviderError>> {
        let settings: GmailSettings = parse_settings(self.kind(), settings)?;

        let request = self
            .http
            .get(format!("{}/users/me/messages", self.base_url))
            .query(&[("q", settings.query.as_str())])
            .bearer_auth(token.secret());
        let list: MessageList = get_json(self.kind(), request).await?;

        debug!(estimate = list.result_size_estimate, "gmail query evaluated");
        if list.result_size_estimate == 0 {
            return Ok(ConditionResult::quiet());
        }

        let ids: Vec<String> = list.messages.into_iter().map(|m| m.id).collect();
        Ok(ConditionResult::fired(json!({
            "unread": list.result_size_estimate,
            "message_ids": ids,
            "query": settings.query,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> JsonValue {
        json!({ "cron": "*/5 * * * *" })
    }

    #[test]
    fn settings_yield_cron() {
        let poller = GmailUnreadPoller::new(reqwest::Client::new());
        let cron = poller.validate_settings(&settings()).expect("valid");
        assert_eq!(cron, "*/5 * * * *");
    }

    #[test]
    fn settings_without_cron_are_invalid() {
        let poller = GmailUnreadPoller::new(reqwest::Client::new());
        let err = poller
            .validate_settings(&json!({ "query": "is:unread" }))
            .err()
            .expect("invalid");
        assert!(matches!(
            err.current_context(),
            ProviderError::InvalidSettings { .. }
        ));
    }

    #[tokio::test]
    async fn unread_mail_fires_with_message_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .and(query_param("q", "is:unread in:inbox"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "m1", "threadId": "t1" }, { "id": "m2", "threadId": "t2" }],
                "resultSizeEstimate": 2,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let poller = GmailUnreadPoller::with_base_url(reqwest::Client::new(), server.uri());
        let result = poller
            .poll(&AccessToken::new("tok"), &settings())
            .await
            .expect("poll");

        assert!(result.fired);
        assert_eq!(result.payload["unread"], 2);
        assert_eq!(result.payload["message_ids"], json!(["m1", "m2"]));
        assert_eq!(result.settings_update, None);
    }

    #[tokio::test]
    async fn empty_inbox_does_not_fire() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resultSizeEstimate": 0,
            })))
            .mount(&server)
            .await;

        let poller = GmailUnreadPoller::with_base_url(reqwest::Client::new(), server.uri());
        let result = poller
            .poll(&AccessToken::new("tok"), &settings())
            .await
            .expect("poll");

        assert!(!result.fired);
    }

    #[tokio::test]
    async fn unauthorized_answer_is_a_query_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let poller = GmailUnreadPoller::with_base_url(reqwest::Client::new(), server.uri());
        let err = poller
            .poll(&AccessToken::new("tok"), &settings())
            .await
            .err()
            .expect("should fail");

        assert_eq!(
            err.current_context(),
            &ProviderError::QueryFailed {
                provider: ProviderKind::GmailUnread,
                status: Some(401),
                reason: "invalid credentials".to_string(),
            }
        );
    }
}
