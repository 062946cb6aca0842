//! Error types for the scheduler crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `ScheduleError`: cron parsing at the registry layer
//! - `SchedulerError`: trigger activation, carrying the trigger instance

use std::fmt;
use triggermenot_core::TriggerInstanceId;

/// Errors from schedule operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from activating trigger instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Settings do not match the trigger kind's schema.
    InvalidTriggerSettings {
        trigger_id: TriggerInstanceId,
        reason: String,
    },
    /// The settings carry a cron expression that does not parse.
    InvalidCronExpression {
        trigger_id: TriggerInstanceId,
        expression: String,
        reason: String,
    },
    /// Trigger instances could not be loaded.
    StoreUnavailable { reason: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTriggerSettings { trigger_id, reason } => {
                write!(f, "invalid settings for trigger {trigger_id}: {reason}")
            }
            Self::InvalidCronExpression {
                trigger_id,
                expression,
                reason,
            } => {
                write!(
                    f,
                    "invalid cron expression '{expression}' for trigger {trigger_id}: {reason}"
                )
            }
            Self::StoreUnavailable { reason } => {
                write!(f, "trigger store unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "61 * * * *".to_string(),
            reason: "minute out of range".to_string(),
        };
        assert!(err.to_string().contains("61 * * * *"));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn settings_error_names_trigger() {
        let trigger_id = TriggerInstanceId::new();
        let err = SchedulerError::InvalidTriggerSettings {
            trigger_id,
            reason: "missing field `cron`".to_string(),
        };
        assert!(err.to_string().contains(&trigger_id.to_string()));
    }
}
