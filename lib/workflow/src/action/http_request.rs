//! Outbound HTTP request action.

use super::{ActionHandler, ActionKind, parse_settings};
use crate::error::ActionError;
use crate::model::ActionInstance;
use async_trait::async_trait;
use reqwest::Method;
use rootcause::prelude::Report;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Settings of an `http_request` action.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpRequestSettings {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Request body, ignored for GET and HEAD.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpRequestSettings {
    fn method(&self) -> Result<Method, ActionError> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes()).map_err(|e| {
            ActionError::InvalidSettings {
                kind: ActionKind::HttpRequest,
                reason: format!("invalid method '{}': {e}", self.method),
            }
        })
    }
}

/// Sends the configured request; any non-success status is a failure.
pub struct HttpRequestHandler {
    http: reqwest::Client,
}

impl HttpRequestHandler {
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ActionHandler for HttpRequestHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::HttpRequest
    }

    fn validate_settings(&self, settings: &JsonValue) -> Result<(), Report<ActionError>> {
        let settings: HttpRequestSettings = parse_settings(self.kind(), settings)?;
        settings.method()?;
        Ok(())
    }

    #[instrument(skip_all, fields(action_id = %action.id))]
    async fn execute(
        &self,
        action: &ActionInstance,
        _payload: &JsonValue,
    ) -> Result<(), Report<ActionError>> {
        let settings: HttpRequestSettings = parse_settings(self.kind(), &action.settings)?;
        let method = settings.method()?;

        let mut request = self.http.request(method.clone(), &settings.url);
        for (name, value) in &settings.headers {
            request = request.header(name, value);
        }
        if method != Method::GET && method != Method::HEAD {
            if let Some(body) = settings.body {
                request = request.body(body);
            }
        }

        let failed = |reason: String| ActionError::ExecutionFailed {
            action_id: action.id,
            reason,
        };

        let response = request.send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        // Drain the body so the connection can be reused.
        let _ = response.bytes().await;

        if !status.is_success() {
            return Err(failed(format!("status {status}")).into());
        }

        debug!(%status, "request sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use triggermenot_core::{ActionInstanceId, PlaygroundId};
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn action(settings: JsonValue) -> ActionInstance {
        ActionInstance {
            id: ActionInstanceId::new(),
            playground_id: PlaygroundId::new(),
            kind: ActionKind::HttpRequest,
            settings,
        }
    }

    #[tokio::test]
    async fn post_sends_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("x-token", "abc"))
            .and(body_string("hello"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let handler = HttpRequestHandler::new(reqwest::Client::new());
        handler
            .execute(
                &action(json!({
                    "url": format!("{}/hook", server.uri()),
                    "method": "post",
                    "headers": { "x-token": "abc" },
                    "body": "hello",
                })),
                &JsonValue::Null,
            )
            .await
            .expect("should succeed");
    }

    #[tokio::test]
    async fn get_drops_the_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(body_string(""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let handler = HttpRequestHandler::new(reqwest::Client::new());
        handler
            .execute(
                &action(json!({
                    "url": format!("{}/ping", server.uri()),
                    "body": "ignored",
                })),
                &JsonValue::Null,
            )
            .await
            .expect("should succeed");
    }

    #[tokio::test]
    async fn error_status_fails_the_action() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let handler = HttpRequestHandler::new(reqwest::Client::new());
        let instance = action(json!({ "url": server.uri() }));
        let err = handler
            .execute(&instance, &JsonValue::Null)
            .await
            .err()
            .expect("should fail");

        match err.current_context() {
            ActionError::ExecutionFailed { action_id, reason } => {
                assert_eq!(*action_id, instance.id);
                assert!(reason.contains("503"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_url_is_invalid() {
        let handler = HttpRequestHandler::new(reqwest::Client::new());
        assert!(handler.validate_settings(&json!({ "method": "GET" })).is_err());
        assert!(
            handler
                .validate_settings(&json!({ "url": "http://x", "method": "BAD METHOD" }))
                .is_err()
        );
    }
}
