//! Builds the recurring task of a trigger instance.
//!
//! A built task holds only the trigger instance id. Each run reloads the
//! instance, so runs always see persisted state and a rebuilt task behaves
//! exactly like the one it replaces.

use crate::error::SchedulerError;
use crate::registry::ScheduledFn;
use futures::FutureExt;
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info_span, warn};
use triggermenot_core::TriggerInstanceId;
use triggermenot_integration::{PollerSet, TokenError, TokenLifecycleManager};
use triggermenot_workflow::{Dispatch, PlaygroundStore, TriggerDispatcher, TriggerInstance};

/// How one run of a trigger task ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The instance was deleted or deactivated; nothing was polled.
    Inactive,
    /// The owner has not authorized the trigger's service.
    NotAuthorized,
    /// The condition did not hold.
    Quiet,
    /// The condition held and the linked actions were started.
    Fired(Dispatch),
    /// Token, poll, store or dispatch failure; already logged.
    Failed,
    /// The run exceeded its time budget.
    TimedOut,
}

/// Collaborators shared by every trigger task.
pub struct TaskFactory {
    store: Arc<dyn PlaygroundStore>,
    tokens: Arc<TokenLifecycleManager>,
    pollers: PollerSet,
    dispatcher: TriggerDispatcher,
    run_timeout: Duration,
}

impl TaskFactory {
    #[must_use]
    pub fn new(
        store: Arc<dyn PlaygroundStore>,
        tokens: Arc<TokenLifecycleManager>,
        pollers: PollerSet,
        dispatcher: TriggerDispatcher,
        run_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tokens,
            pollers,
            dispatcher,
            run_timeout,
        }
    }

    /// Validates the instance settings and returns its cron expression with
    /// the task to run at each instant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTriggerSettings` when no poller serves the kind or
    /// the settings do not match its schema.
    pub fn build(
        self: &Arc<Self>,
        instance: &TriggerInstance,
    ) -> Result<(String, TriggerTask), Report<SchedulerError>> {
        let poller = self
            .pollers
            .get(instance.kind)
            .ok_or_else(|| SchedulerError::InvalidTriggerSettings {
                trigger_id: instance.id,
                reason: format!("no poller for trigger kind {}", instance.kind),
            })?;

        let cron = poller.validate_settings(&instance.settings).map_err(|e| {
            SchedulerError::InvalidTriggerSettings {
                trigger_id: instance.id,
                reason: e.current_context().to_string(),
            }
        })?;

        let task = TriggerTask {
            trigger_id: instance.id,
            factory: Arc::clone(self),
        };
        Ok((cron, task))
    }
}

/// The recurring work of one trigger instance.
#[derive(Clone)]
pub struct TriggerTask {
    trigger_id: TriggerInstanceId,
    factory: Arc<TaskFactory>,
}

impl TriggerTask {
    /// The instance this task polls for.
    #[must_use]
    pub fn trigger_id(&self) -> TriggerInstanceId {
        self.trigger_id
    }

    /// Converts the task into a registry callback.
    #[must_use]
    pub fn into_scheduled(self) -> ScheduledFn {
        Arc::new(move || {
            let task = self.clone();
            async move {
                task.run().await;
            }
            .boxed()
        })
    }

    /// Runs one poll cycle within the run timeout.
    pub async fn run(&self) -> RunOutcome {
        let span = info_span!("trigger_run", trigger_id = %self.trigger_id);
        let cycle = tokio::time::timeout(self.factory.run_timeout, self.cycle());
        match cycle.instrument(span).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    trigger_id = %self.trigger_id,
                    timeout = ?self.factory.run_timeout,
                    "trigger run timed out"
                );
                RunOutcome::TimedOut
            }
        }
    }

    async fn cycle(&self) -> RunOutcome {
        let f = &self.factory;

        let instance = match f.store.get_trigger_instance(self.trigger_id).await {
            Ok(Some(instance)) if instance.active => instance,
            Ok(_) => {
                debug!("trigger instance gone or inactive, skipping");
                return RunOutcome::Inactive;
            }
            Err(e) => {
                warn!(error = %e, "failed to load trigger instance");
                return RunOutcome::Failed;
            }
        };

        let owner = match f.store.get_owning_user(self.trigger_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                debug!("trigger instance has no owner, skipping");
                return RunOutcome::Inactive;
            }
            Err(e) => {
                warn!(error = %e, "failed to resolve trigger owner");
                return RunOutcome::Failed;
            }
        };

        let Some(poller) = f.pollers.get(instance.kind) else {
            warn!(kind = %instance.kind, "no poller for trigger kind");
            return RunOutcome::Failed;
        };

        let service = instance.kind.service();
        let token = match f.tokens.get_valid_token(owner, service).await {
            Ok(token) => token,
            Err(report) => {
                return match report.current_context() {
                    TokenError::CredentialNotFound { .. } => {
                        debug!(user_id = %owner, %service, "service not authorized, skipping");
                        RunOutcome::NotAuthorized
                    }
                    TokenError::RefreshFailed { .. } => {
                        warn!(user_id = %owner, %service, error = %report, "token refresh failed");
                        RunOutcome::Failed
                    }
                    TokenError::Storage { .. } => {
                        warn!(
                            user_id = %owner,
                            %service,
                            error = %report,
                            "credential unavailable"
                        );
                        RunOutcome::Failed
                    }
                };
            }
        };

        let result = match poller.poll(&token, &instance.settings).await {
            Ok(result) => result,
            Err(report) => {
                warn!(kind = %instance.kind, error = %report, "provider query failed");
                return RunOutcome::Failed;
            }
        };

        if let Some(settings) = &result.settings_update {
            if let Err(e) = f.store.update_trigger_settings(self.trigger_id, settings).await {
                warn!(error = %e, "failed to persist trigger settings");
                return RunOutcome::Failed;
            }
        }

        if !result.fired {
            debug!(kind = %instance.kind, "condition not met");
            return RunOutcome::Quiet;
        }

        match f.dispatcher.fire(self.trigger_id, result.payload).await {
            Ok(dispatch) => RunOutcome::Fired(dispatch),
            Err(report) => {
                warn!(error = %report, "dispatch failed");
                RunOutcome::Failed
            }
        }
    }
}
