//! Playground records the engine reads.
//!
//! A playground is a user's graph of trigger instances linked to action
//! instances. Creation and editing happen elsewhere; the engine only reads
//! these records and persists trigger settings updates.

use crate::action::ActionKind;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use triggermenot_core::{ActionInstanceId, PlaygroundId, TriggerInstanceId};
use triggermenot_integration::ProviderKind;

/// A configured condition watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerInstance {
    pub id: TriggerInstanceId,
    pub playground_id: PlaygroundId,
    pub kind: ProviderKind,
    /// Kind-specific settings; always carries `cron`.
    pub settings: JsonValue,
    /// Only active instances are scheduled.
    pub active: bool,
}

/// A configured effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInstance {
    pub id: ActionInstanceId,
    pub playground_id: PlaygroundId,
    pub kind: ActionKind,
    pub settings: JsonValue,
}

/// Directed edge from a trigger instance to an action instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerLink {
    pub trigger_id: TriggerInstanceId,
    pub action_id: ActionInstanceId,
}
