//! Fan-out of a trigger firing to its linked actions.
//!
//! Every link gets its own spawned execution unit. Units share nothing but
//! the payload, so a slow, failing or panicking action never delays or
//! affects its siblings, and the firing trigger does not wait for them.

use crate::action::ActionHandlers;
use crate::error::{ActionError, DispatchError};
use crate::store::PlaygroundStore;
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use triggermenot_core::{ActionInstanceId, TriggerInstanceId};

/// How one action execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    Failed,
    TimedOut,
    /// The action instance was deleted after the link was read.
    Missing,
}

/// Execution units started by one firing.
#[derive(Debug)]
pub struct Dispatch {
    units: Vec<(ActionInstanceId, JoinHandle<ActionOutcome>)>,
}

impl Dispatch {
    /// Number of actions started.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Waits for every unit and returns the outcomes in link order.
    pub async fn join(self) -> Vec<(ActionInstanceId, ActionOutcome)> {
        let mut outcomes = Vec::with_capacity(self.units.len());
        for (action_id, handle) in self.units {
            let outcome = handle.await.unwrap_or(ActionOutcome::Failed);
            outcomes.push((action_id, outcome));
        }
        outcomes
    }
}

/// Executes the actions linked to a trigger instance.
#[derive(Clone)]
pub struct TriggerDispatcher {
    store: Arc<dyn PlaygroundStore>,
    handlers: ActionHandlers,
    action_timeout: Duration,
}

impl TriggerDispatcher {
    #[must_use]
    pub fn new(
        store: Arc<dyn PlaygroundStore>,
        handlers: ActionHandlers,
        action_timeout: Duration,
    ) -> Self {
        Self {
            store,
            handlers,
            action_timeout,
        }
    }

    /// Starts one execution unit per link of `trigger_id`.
    ///
    /// Returns once the units are spawned. A trigger without links yields an
    /// empty [`Dispatch`].
    ///
    /// # Errors
    ///
    /// Returns `LinksUnavailable` if the links cannot be read; no action runs.
    #[instrument(skip(self, payload), fields(trigger_id = %trigger_id))]
    pub async fn fire(
        &self,
        trigger_id: TriggerInstanceId,
        payload: JsonValue,
    ) -> Result<Dispatch, Report<DispatchError>> {
        let links = self
            .store
            .get_trigger_links(trigger_id)
            .await
            .map_err(|e| DispatchError::LinksUnavailable {
                trigger_id,
                reason: e.to_string(),
            })?;

        if links.is_empty() {
            debug!("trigger has no linked actions");
            return Ok(Dispatch { units: Vec::new() });
        }

        let payload = Arc::new(payload);
        let units = links
            .into_iter()
            .map(|link| {
                let unit = ActionUnit {
                    store: Arc::clone(&self.store),
                    handlers: self.handlers.clone(),
                    timeout: self.action_timeout,
                    action_id: link.action_id,
                    payload: Arc::clone(&payload),
                };
                let span = info_span!("action", %trigger_id, action_id = %link.action_id);
                (link.action_id, tokio::spawn(unit.run().instrument(span)))
            })
            .collect::<Vec<_>>();

        info!(actions = units.len(), "trigger fired");
        Ok(Dispatch { units })
    }
}

struct ActionUnit {
    store: Arc<dyn PlaygroundStore>,
    handlers: ActionHandlers,
    timeout: Duration,
    action_id: ActionInstanceId,
    payload: Arc<JsonValue>,
}

impl ActionUnit {
    async fn run(self) -> ActionOutcome {
        let action = match self.store.get_action_instance(self.action_id).await {
            Ok(Some(action)) => action,
            Ok(None) => {
                debug!("linked action no longer exists");
                return ActionOutcome::Missing;
            }
            Err(e) => {
                warn!(error = %e, "failed to load action instance");
                return ActionOutcome::Failed;
            }
        };

        let Some(handler) = self.handlers.get(action.kind) else {
            warn!(kind = %action.kind, "no handler registered for action kind");
            return ActionOutcome::Failed;
        };

        if let Err(report) = handler.validate_settings(&action.settings) {
            warn!(kind = %action.kind, error = %report, "action settings rejected");
            return ActionOutcome::Failed;
        }

        match tokio::time::timeout(self.timeout, handler.execute(&action, &self.payload)).await {
            Ok(Ok(())) => {
                info!(kind = %action.kind, "action completed");
                ActionOutcome::Completed
            }
            Ok(Err(report)) => {
                warn!(kind = %action.kind, error = %report, "action failed");
                ActionOutcome::Failed
            }
            Err(_) => {
                let err = ActionError::TimedOut {
                    action_id: self.action_id,
                };
                warn!(kind = %action.kind, error = %err, "action failed");
                ActionOutcome::TimedOut
            }
        }
    }
}
