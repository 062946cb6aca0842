//! Action handlers: effects executed when a linked trigger fires.

mod http_request;
mod outlook_mail;

pub use http_request::{HttpRequestHandler, HttpRequestSettings};
pub use outlook_mail::{OutlookSendMailHandler, OutlookSendMailSettings};

use crate::error::ActionError;
use crate::model::ActionInstance;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Closed set of action kinds, persisted as the instance discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Outbound HTTP request.
    HttpRequest,
    /// Mail sent from the playground owner's Outlook account.
    OutlookSendMail,
}

impl ActionKind {
    pub const ALL: [Self; 2] = [Self::HttpRequest, Self::OutlookSendMail];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::HttpRequest => "http_request",
            Self::OutlookSendMail => "outlook_send_mail",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown action kind '{s}'"))
    }
}

/// Executes one kind of action.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The kind this handler serves.
    fn kind(&self) -> ActionKind;

    /// Checks settings against the kind's schema.
    fn validate_settings(&self, settings: &JsonValue) -> Result<(), Report<ActionError>>;

    /// Runs the action with the payload of the firing trigger.
    async fn execute(
        &self,
        action: &ActionInstance,
        payload: &JsonValue,
    ) -> Result<(), Report<ActionError>>;
}

pub(crate) fn parse_settings<T: serde::de::DeserializeOwned>(
    kind: ActionKind,
    settings: &JsonValue,
) -> Result<T, ActionError> {
    T::deserialize(settings).map_err(|e| ActionError::InvalidSettings {
        kind,
        reason: e.to_string(),
    })
}

/// Lookup table from action kind to its handler.
#[derive(Clone, Default)]
pub struct ActionHandlers {
    handlers: HashMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionHandlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under its kind, replacing any previous one.
    #[must_use]
    pub fn with(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    #[must_use]
    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }
}
