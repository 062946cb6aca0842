//! In-memory doubles for the playground store and action handlers.
//!
//! Enabled for this crate's tests and, through the `test-util` feature, for
//! the scheduler's tests.

use crate::action::{ActionHandler, ActionKind};
use crate::error::{ActionError, StoreError};
use crate::model::{ActionInstance, TriggerInstance, TriggerLink};
use crate::store::PlaygroundStore;
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use triggermenot_core::{ActionInstanceId, PlaygroundId, TriggerInstanceId, UserId};

#[derive(Default)]
struct Tables {
    owners: HashMap<PlaygroundId, UserId>,
    triggers: HashMap<TriggerInstanceId, TriggerInstance>,
    actions: HashMap<ActionInstanceId, ActionInstance>,
    links: Vec<TriggerLink>,
}

/// Playground store backed by maps.
///
/// Removing a trigger or action also removes its links, like the cascading
/// foreign keys of the relational schema.
#[derive(Default)]
pub struct MemoryPlaygroundStore {
    tables: Mutex<Tables>,
}

impl MemoryPlaygroundStore {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_playground(&self, id: PlaygroundId, owner: UserId) {
        self.tables().owners.insert(id, owner);
    }

    pub fn add_trigger(&self, trigger: TriggerInstance) {
        self.tables().triggers.insert(trigger.id, trigger);
    }

    pub fn add_action(&self, action: ActionInstance) {
        self.tables().actions.insert(action.id, action);
    }

    pub fn link(&self, trigger_id: TriggerInstanceId, action_id: ActionInstanceId) {
        self.tables().links.push(TriggerLink {
            trigger_id,
            action_id,
        });
    }

    pub fn remove_trigger(&self, id: TriggerInstanceId) {
        let mut tables = self.tables();
        tables.triggers.remove(&id);
        tables.links.retain(|link| link.trigger_id != id);
    }

    pub fn remove_action(&self, id: ActionInstanceId) {
        let mut tables = self.tables();
        tables.actions.remove(&id);
        tables.links.retain(|link| link.action_id != id);
    }

    pub fn set_active(&self, id: TriggerInstanceId, active: bool) {
        if let Some(trigger) = self.tables().triggers.get_mut(&id) {
            trigger.active = active;
        }
    }

    pub fn trigger(&self, id: TriggerInstanceId) -> Option<TriggerInstance> {
        self.tables().triggers.get(&id).cloned()
    }
}

#[async_trait]
impl PlaygroundStore for MemoryPlaygroundStore {
    async fn get_trigger_instance(
        &self,
        id: TriggerInstanceId,
    ) -> Result<Option<TriggerInstance>, StoreError> {
        Ok(self.trigger(id))
    }

    async fn list_active_trigger_instances(&self) -> Result<Vec<TriggerInstance>, StoreError> {
        let mut active: Vec<_> = self
            .tables()
            .triggers
            .values()
            .filter(|t| t.active)
            .cloned()
            .collect();
        active.sort_by_key(|t| t.id);
        Ok(active)
    }

    async fn get_owning_user(&self, id: TriggerInstanceId) -> Result<Option<UserId>, StoreError> {
        let tables = self.tables();
        Ok(tables
            .triggers
            .get(&id)
            .and_then(|t| tables.owners.get(&t.playground_id).copied()))
    }

    async fn get_trigger_links(
        &self,
        id: TriggerInstanceId,
    ) -> Result<Vec<TriggerLink>, StoreError> {
        Ok(self
            .tables()
            .links
            .iter()
            .filter(|link| link.trigger_id == id)
            .copied()
            .collect())
    }

    async fn get_action_instance(
        &self,
        id: ActionInstanceId,
    ) -> Result<Option<ActionInstance>, StoreError> {
        Ok(self.tables().actions.get(&id).cloned())
    }

    async fn get_playground_owner(&self, id: PlaygroundId) -> Result<Option<UserId>, StoreError> {
        Ok(self.tables().owners.get(&id).copied())
    }

    async fn update_trigger_settings(
        &self,
        id: TriggerInstanceId,
        settings: &JsonValue,
    ) -> Result<(), StoreError> {
        if let Some(trigger) = self.tables().triggers.get_mut(&id) {
            trigger.settings = settings.clone();
        }
        Ok(())
    }
}

/// Action handler that records every execution.
///
/// Actions listed with [`RecordingHandler::fail_for`] fail; every execution
/// first waits for the configured delay. Settings must be a JSON object.
pub struct RecordingHandler {
    kind: ActionKind,
    executed: Mutex<Vec<(ActionInstanceId, JsonValue)>>,
    failing: Mutex<HashSet<ActionInstanceId>>,
    delay: Duration,
}

impl RecordingHandler {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            executed: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            delay: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_for(&self, id: ActionInstanceId) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
    }

    /// Executions in completion order.
    pub fn executed(&self) -> Vec<(ActionInstanceId, JsonValue)> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    fn kind(&self) -> ActionKind {
        self.kind
    }

    fn validate_settings(&self, settings: &JsonValue) -> Result<(), Report<ActionError>> {
        if settings.is_object() {
            Ok(())
        } else {
            Err(ActionError::InvalidSettings {
                kind: self.kind,
                reason: "settings must be an object".to_string(),
            }
            .into())
        }
    }

    async fn execute(
        &self,
        action: &ActionInstance,
        payload: &JsonValue,
    ) -> Result<(), Report<ActionError>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fails = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&action.id);
        if fails {
            return Err(ActionError::ExecutionFailed {
                action_id: action.id,
                reason: "configured to fail".to_string(),
            }
            .into());
        }
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((action.id, payload.clone()));
        Ok(())
    }
}
