//! Storage seam for playground records.

use crate::error::StoreError;
use crate::model::{ActionInstance, TriggerInstance, TriggerLink};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use triggermenot_core::{ActionInstanceId, PlaygroundId, TriggerInstanceId, UserId};

/// Read access to playgrounds, plus trigger settings updates.
///
/// Missing records are `Ok(None)`, not errors: an instance can be deleted
/// between scheduling and a run.
#[async_trait]
pub trait PlaygroundStore: Send + Sync {
    /// Loads a trigger instance.
    async fn get_trigger_instance(
        &self,
        id: TriggerInstanceId,
    ) -> Result<Option<TriggerInstance>, StoreError>;

    /// Lists every trigger instance flagged active, across all playgrounds.
    async fn list_active_trigger_instances(&self) -> Result<Vec<TriggerInstance>, StoreError>;

    /// Resolves the user owning the playground of a trigger instance.
    async fn get_owning_user(&self, id: TriggerInstanceId) -> Result<Option<UserId>, StoreError>;

    /// Lists the links leaving a trigger instance.
    async fn get_trigger_links(
        &self,
        id: TriggerInstanceId,
    ) -> Result<Vec<TriggerLink>, StoreError>;

    /// Loads an action instance.
    async fn get_action_instance(
        &self,
        id: ActionInstanceId,
    ) -> Result<Option<ActionInstance>, StoreError>;

    /// Resolves the owner of a playground.
    async fn get_playground_owner(&self, id: PlaygroundId) -> Result<Option<UserId>, StoreError>;

    /// Replaces the settings of a trigger instance.
    async fn update_trigger_settings(
        &self,
        id: TriggerInstanceId,
        settings: &JsonValue,
    ) -> Result<(), StoreError>;
}
