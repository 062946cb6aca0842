//! Error types for the workflow crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: playground store reads and writes
//! - `ActionError`: validation and execution of a single action instance
//! - `DispatchError`: fan-out of one trigger firing

use crate::action::ActionKind;
use std::fmt;
use triggermenot_core::{ActionInstanceId, TriggerInstanceId};

/// Errors from playground store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A stored record could not be decoded.
    InvalidRecord { entity: &'static str, reason: String },
    /// Storage operation failed.
    StorageFailed { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRecord { entity, reason } => {
                write!(f, "invalid {entity} record: {reason}")
            }
            Self::StorageFailed { reason } => write!(f, "playground storage failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from action handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The action settings do not match the kind's schema.
    InvalidSettings { kind: ActionKind, reason: String },
    /// The action was attempted and failed.
    ExecutionFailed {
        action_id: ActionInstanceId,
        reason: String,
    },
    /// The action did not finish within the allotted time.
    TimedOut { action_id: ActionInstanceId },
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSettings { kind, reason } => {
                write!(f, "invalid {kind} settings: {reason}")
            }
            Self::ExecutionFailed { action_id, reason } => {
                write!(f, "action {action_id} failed: {reason}")
            }
            Self::TimedOut { action_id } => write!(f, "action {action_id} timed out"),
        }
    }
}

impl std::error::Error for ActionError {}

/// Errors from dispatching a firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The trigger's links could not be loaded.
    LinksUnavailable {
        trigger_id: TriggerInstanceId,
        reason: String,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinksUnavailable { trigger_id, reason } => {
                write!(f, "links of trigger {trigger_id} unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_errors_name_the_action() {
        let action_id = ActionInstanceId::new();
        let failed = ActionError::ExecutionFailed {
            action_id,
            reason: "status 500".to_string(),
        };
        assert!(failed.to_string().contains(&action_id.to_string()));
        assert!(
            ActionError::TimedOut { action_id }
                .to_string()
                .ends_with("timed out")
        );
    }

    #[test]
    fn invalid_settings_name_the_kind() {
        let err = ActionError::InvalidSettings {
            kind: ActionKind::HttpRequest,
            reason: "missing field `url`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid http_request settings: missing field `url`"
        );
    }
}
