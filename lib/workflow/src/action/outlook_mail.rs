//! Send-mail action through Microsoft Graph on behalf of the playground owner.

use super::{ActionHandler, ActionKind, parse_settings};
use crate::error::ActionError;
use crate::model::ActionInstance;
use crate::store::PlaygroundStore;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{debug, instrument};
use triggermenot_core::ServiceKind;
use triggermenot_integration::TokenLifecycleManager;
use triggermenot_integration::provider::GRAPH_API_BASE;

/// Settings of an `outlook_send_mail` action.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutlookSendMailSettings {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// Sends a plain-text mail; the trigger payload is appended to the body.
pub struct OutlookSendMailHandler {
    http: reqwest::Client,
    store: Arc<dyn PlaygroundStore>,
    tokens: Arc<TokenLifecycleManager>,
    base_url: String,
}

impl OutlookSendMailHandler {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        store: Arc<dyn PlaygroundStore>,
        tokens: Arc<TokenLifecycleManager>,
    ) -> Self {
        Self {
            http,
            store,
            tokens,
            base_url: GRAPH_API_BASE.to_string(),
        }
    }

    /// Points the handler at another Graph base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn mail_body(text: &str, payload: &JsonValue) -> String {
    if payload.is_null() {
        return text.to_string();
    }
    let rendered = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    if text.is_empty() {
        rendered
    } else {
        format!("{text}\n\n{rendered}")
    }
}

#[async_trait]
impl ActionHandler for OutlookSendMailHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::OutlookSendMail
    }

    fn validate_settings(&self, settings: &JsonValue) -> Result<(), Report<ActionError>> {
        parse_settings::<OutlookSendMailSettings>(self.kind(), settings)?;
        Ok(())
    }

    #[instrument(skip_all, fields(action_id = %action.id))]
    async fn execute(
        &self,
        action: &ActionInstance,
        payload: &JsonValue,
    ) -> Result<(), Report<ActionError>> {
        let settings: OutlookSendMailSettings = parse_settings(self.kind(), &action.settings)?;
        let failed = |reason: String| ActionError::ExecutionFailed {
            action_id: action.id,
            reason,
        };

        let owner = self
            .store
            .get_playground_owner(action.playground_id)
            .await
            .map_err(|e| failed(e.to_string()))?
            .ok_or_else(|| failed(format!("playground {} has no owner", action.playground_id)))?;

        let token = self
            .tokens
            .get_valid_token(owner, ServiceKind::Microsoft)
            .await
            .map_err(|e| failed(e.current_context().to_string()))?;

        let message = json!({
            "message": {
                "subject": settings.subject,
                "body": {
                    "contentType": "Text",
                    "content": mail_body(&settings.body, payload),
                },
                "toRecipients": [
                    { "emailAddress": { "address": settings.to } }
                ],
            },
            "saveToSentItems": true,
        });

        let response = self
            .http
            .post(format!("{}/me/sendMail", self.base_url))
            .bearer_auth(token.secret())
            .json(&message)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("status {status}: {body}")).into());
        }

        debug!(user_id = %owner, "mail sent");
        Ok(())
    }
}
