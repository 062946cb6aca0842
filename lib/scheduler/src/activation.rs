//! Trigger activation: the bridge from persisted instances to the registry.
//!
//! Instances are activated one by one, or reconciled in bulk with the store
//! by [`TriggerScheduler::sync`], which the engine runs at startup and then
//! periodically to pick up instances created, edited, deactivated or deleted
//! elsewhere.

use crate::error::SchedulerError;
use crate::factory::TaskFactory;
use crate::registry::{CronRegistry, TaskHandle};
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};
use triggermenot_core::TriggerInstanceId;
use triggermenot_integration::ProviderKind;
use triggermenot_workflow::{PlaygroundStore, TriggerInstance};

/// What a call to [`TriggerScheduler::sync`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Instances newly scheduled or rescheduled with a new cron or kind.
    pub scheduled: usize,
    /// Entries dropped because their instance is gone or inactive.
    pub removed: usize,
    /// Instances whose settings were refused for the first time.
    pub failed: usize,
}

struct Entry {
    handle: TaskHandle,
    kind: ProviderKind,
    cron: String,
}

#[derive(Default)]
struct Schedules {
    entries: HashMap<TriggerInstanceId, Entry>,
    // Settings refused per instance; a re-sync only retries once they change.
    rejected: HashMap<TriggerInstanceId, (ProviderKind, JsonValue)>,
}

/// Keeps exactly one schedule entry per activated trigger instance.
pub struct TriggerScheduler {
    registry: CronRegistry,
    factory: Arc<TaskFactory>,
    store: Arc<dyn PlaygroundStore>,
    schedules: Mutex<Schedules>,
}

impl TriggerScheduler {
    #[must_use]
    pub fn new(
        registry: CronRegistry,
        factory: Arc<TaskFactory>,
        store: Arc<dyn PlaygroundStore>,
    ) -> Self {
        Self {
            registry,
            factory,
            store,
            schedules: Mutex::new(Schedules::default()),
        }
    }

    // Held across registry changes so activation and deactivation of one
    // instance never interleave.
    fn schedules(&self) -> MutexGuard<'_, Schedules> {
        self.schedules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules a trigger instance.
    ///
    /// Re-activating an instance replaces its schedule entry. When the new
    /// settings are rejected, the previous entry stays in place.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTriggerSettings` or `InvalidCronExpression`.
    #[instrument(skip(self, instance), fields(trigger_id = %instance.id, kind = %instance.kind))]
    pub fn activate(
        &self,
        instance: &TriggerInstance,
    ) -> Result<TaskHandle, Report<SchedulerError>> {
        let mut schedules = self.schedules();
        self.activate_locked(&mut schedules, instance)
    }

    fn activate_locked(
        &self,
        schedules: &mut Schedules,
        instance: &TriggerInstance,
    ) -> Result<TaskHandle, Report<SchedulerError>> {
        let (handle, cron) = match self.register(instance) {
            Ok(registered) => registered,
            Err(report) => {
                schedules
                    .rejected
                    .insert(instance.id, (instance.kind, instance.settings.clone()));
                return Err(report);
            }
        };
        schedules.rejected.remove(&instance.id);

        let entry = Entry {
            handle,
            kind: instance.kind,
            cron: cron.clone(),
        };
        let previous = schedules.entries.insert(instance.id, entry);
        if let Some(previous) = &previous {
            self.registry.cancel(previous.handle);
        }

        info!(%cron, task = %handle, replaced = previous.is_some(), "trigger activated");
        Ok(handle)
    }

    fn register(
        &self,
        instance: &TriggerInstance,
    ) -> Result<(TaskHandle, String), Report<SchedulerError>> {
        let (cron, task) = self.factory.build(instance)?;
        let handle = self
            .registry
            .register_task(&cron, task.into_scheduled())
            .map_err(|e| SchedulerError::InvalidCronExpression {
                trigger_id: instance.id,
                expression: cron.clone(),
                reason: e.current_context().to_string(),
            })?;
        debug!(%cron, task = %handle, "schedule registered");
        Ok((handle, cron))
    }

    /// Stops scheduling a trigger instance. Unknown ids are a no-op.
    #[instrument(skip(self))]
    pub fn deactivate(&self, trigger_id: TriggerInstanceId) -> bool {
        let mut schedules = self.schedules();
        schedules.rejected.remove(&trigger_id);
        match schedules.entries.remove(&trigger_id) {
            Some(entry) => {
                self.registry.cancel(entry.handle);
                info!("trigger deactivated");
                true
            }
            None => false,
        }
    }

    /// Activates every active instance in the store.
    ///
    /// An instance that fails to activate is logged and skipped. Returns the
    /// number of instances scheduled.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the instances cannot be listed.
    pub async fn rehydrate(&self) -> Result<usize, Report<SchedulerError>> {
        let summary = self.sync().await?;
        info!(
            scheduled = summary.scheduled,
            failed = summary.failed,
            "trigger instances rehydrated"
        );
        Ok(summary.scheduled)
    }

    /// Reconciles schedule entries with the active instances in the store.
    ///
    /// New instances are activated, instances whose kind or cron changed are
    /// rescheduled, and entries of deactivated or deleted instances are
    /// cancelled. Other settings are re-read by every run and need no
    /// rescheduling.
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the instances cannot be listed; nothing
    /// is changed in that case.
    pub async fn sync(&self) -> Result<SyncSummary, Report<SchedulerError>> {
        let instances = self
            .store
            .list_active_trigger_instances()
            .await
            .map_err(|e| SchedulerError::StoreUnavailable {
                reason: e.to_string(),
            })?;
        let active: HashSet<TriggerInstanceId> = instances.iter().map(|i| i.id).collect();

        let mut summary = SyncSummary::default();
        let mut schedules = self.schedules();

        let stale: Vec<TriggerInstanceId> = schedules
            .entries
            .keys()
            .filter(|id| !active.contains(id))
            .copied()
            .collect();
        for trigger_id in stale {
            if let Some(entry) = schedules.entries.remove(&trigger_id) {
                self.registry.cancel(entry.handle);
                info!(%trigger_id, "trigger no longer active, schedule removed");
                summary.removed += 1;
            }
        }
        schedules.rejected.retain(|id, _| active.contains(id));

        for instance in &instances {
            if self.is_current(&schedules, instance) {
                continue;
            }
            match self.activate_locked(&mut schedules, instance) {
                Ok(_) => summary.scheduled += 1,
                Err(report) => {
                    warn!(
                        trigger_id = %instance.id,
                        error = %report,
                        "trigger could not be scheduled"
                    );
                    summary.failed += 1;
                }
            }
        }

        if summary == SyncSummary::default() {
            debug!("schedules up to date");
        } else {
            info!(
                scheduled = summary.scheduled,
                removed = summary.removed,
                failed = summary.failed,
                "schedules synchronized"
            );
        }
        Ok(summary)
    }

    fn is_current(&self, schedules: &Schedules, instance: &TriggerInstance) -> bool {
        let refused = schedules
            .rejected
            .get(&instance.id)
            .is_some_and(|(kind, settings)| {
                *kind == instance.kind && *settings == instance.settings
            });
        if refused {
            return true;
        }

        let Some(entry) = schedules.entries.get(&instance.id) else {
            return false;
        };
        entry.kind == instance.kind
            && self
                .factory
                .build(instance)
                .is_ok_and(|(cron, _)| cron == entry.cron)
    }

    /// Returns whether the instance currently has a schedule entry.
    #[must_use]
    pub fn is_scheduled(&self, trigger_id: TriggerInstanceId) -> bool {
        self.schedules().entries.contains_key(&trigger_id)
    }

    /// Number of scheduled instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schedules().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every schedule entry.
    pub async fn shutdown(&self) {
        {
            let mut schedules = self.schedules();
            schedules.entries.clear();
            schedules.rejected.clear();
        }
        self.registry.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::tests::{FakePoller, World};
    use crate::registry::VirtualClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use triggermenot_core::{PlaygroundId, ServiceKind};
    use triggermenot_integration::ProviderKind;
    use triggermenot_integration::testing::{FakeRefresher, credential};

    fn scheduler(world: &World) -> TriggerScheduler {
        scheduler_with(world, world.factory())
    }

    fn scheduler_with(world: &World, factory: Arc<TaskFactory>) -> TriggerScheduler {
        let anchor = Utc.with_ymd_and_hms(2026, 2, 9, 12, 0, 30).unwrap();
        TriggerScheduler::new(
            CronRegistry::new(Arc::new(VirtualClock::new(anchor))),
            factory,
            world.store.clone(),
        )
    }

    fn another_trigger(world: &World) -> TriggerInstance {
        let mut trigger = world.trigger.clone();
        trigger.id = TriggerInstanceId::new();
        world.store.add_trigger(trigger.clone());
        trigger
    }

    fn firing_world(actions: usize) -> World {
        let world = World::new(
            actions,
            FakeRefresher::rotating(),
            FakePoller::firing(ProviderKind::GmailUnread, json!({ "unread": 1 })),
        );
        world
            .credentials
            .insert(credential(world.owner, ServiceKind::Google, false));
        world
    }

    #[tokio::test(start_paused = true)]
    async fn activated_trigger_fires_linked_actions_each_minute() {
        let world = firing_world(2);
        let scheduler = scheduler(&world);

        scheduler.activate(&world.trigger).expect("activate");
        tokio::time::sleep(Duration::from_secs(3 * 60)).await;

        assert_eq!(world.handler.executed().len(), 3 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reactivation_keeps_a_single_entry() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);

        let first = scheduler.activate(&world.trigger).expect("activate");
        let second = scheduler.activate(&world.trigger).expect("activate");
        tokio::time::sleep(Duration::from_secs(2 * 60)).await;

        assert_ne!(first, second);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.registry.len(), 1);
        assert_eq!(world.handler.executed().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reactivation_keeps_previous_entry() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);
        scheduler.activate(&world.trigger).expect("activate");

        let mut broken = world.trigger.clone();
        broken.settings = json!({ "cron": "every day at noon" });
        let err = scheduler.activate(&broken).err().expect("should fail");

        assert!(matches!(
            err.current_context(),
            SchedulerError::InvalidCronExpression { .. }
        ));
        assert!(scheduler.is_scheduled(world.trigger.id));
        assert_eq!(scheduler.registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deactivation_stops_firing() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);
        scheduler.activate(&world.trigger).expect("activate");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(scheduler.deactivate(world.trigger.id));
        assert!(!scheduler.deactivate(world.trigger.id));
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;

        assert_eq!(world.handler.executed().len(), 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rehydrate_schedules_valid_active_instances() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);

        let mut broken = world.trigger.clone();
        broken.id = TriggerInstanceId::new();
        broken.settings = json!({ "query": "no cron here" });
        world.store.add_trigger(broken.clone());

        let mut dormant = world.trigger.clone();
        dormant.id = TriggerInstanceId::new();
        dormant.playground_id = PlaygroundId::new();
        dormant.active = false;
        world.store.add_trigger(dormant.clone());

        let scheduled = scheduler.rehydrate().await.expect("rehydrate");

        assert_eq!(scheduled, 1);
        assert!(scheduler.is_scheduled(world.trigger.id));
        assert!(!scheduler.is_scheduled(broken.id));
        assert!(!scheduler.is_scheduled(dormant.id));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_everything() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);
        scheduler.activate(&world.trigger).expect("activate");

        scheduler.shutdown().await;
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;

        assert!(scheduler.is_empty());
        assert!(world.handler.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_run_does_not_block_next_instant() {
        let world = World::new(
            1,
            FakeRefresher::rotating(),
            FakePoller::hanging(ProviderKind::GmailUnread),
        );
        world
            .credentials
            .insert(credential(world.owner, ServiceKind::Google, false));
        let factory = world.factory_with_run_timeout(Duration::from_secs(20));
        let scheduler = scheduler_with(&world, factory);

        scheduler.activate(&world.trigger).expect("activate");
        tokio::time::sleep(Duration::from_secs(3 * 60)).await;

        // Every minute polls again once the stalled run has been abandoned.
        assert_eq!(world.poller.polls.load(Ordering::SeqCst), 3);
        assert!(world.handler.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_schedules_instances_activated_later() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);
        assert_eq!(scheduler.rehydrate().await.expect("rehydrate"), 1);

        let added = another_trigger(&world);
        let summary = scheduler.sync().await.expect("sync");

        assert_eq!(
            summary,
            SyncSummary {
                scheduled: 1,
                ..SyncSummary::default()
            }
        );
        assert!(scheduler.is_scheduled(added.id));
        assert_eq!(scheduler.registry.len(), 2);
        assert_eq!(scheduler.sync().await.expect("sync"), SyncSummary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_removes_deactivated_and_deleted_instances() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);
        let deleted = another_trigger(&world);
        scheduler.rehydrate().await.expect("rehydrate");

        world.store.set_active(world.trigger.id, false);
        world.store.remove_trigger(deleted.id);
        let summary = scheduler.sync().await.expect("sync");
        tokio::time::sleep(Duration::from_secs(3 * 60)).await;

        assert_eq!(summary.removed, 2);
        assert!(scheduler.is_empty());
        assert!(scheduler.registry.is_empty());
        assert!(world.handler.executed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_reschedules_changed_cron_only() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);
        scheduler.activate(&world.trigger).expect("activate");

        let mut edited = world.trigger.clone();
        edited.settings = json!({ "cron": "* * * * *", "cursor": "h-1" });
        world.store.add_trigger(edited.clone());
        assert_eq!(scheduler.sync().await.expect("sync"), SyncSummary::default());

        edited.settings = json!({ "cron": "*/5 * * * *" });
        world.store.add_trigger(edited);
        let summary = scheduler.sync().await.expect("sync");
        tokio::time::sleep(Duration::from_secs(10 * 60)).await;

        assert_eq!(summary.scheduled, 1);
        assert_eq!(scheduler.registry.len(), 1);
        // 12:05 and 12:10.
        assert_eq!(world.handler.executed().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_retries_refused_settings_only_after_an_edit() {
        let world = firing_world(1);
        let scheduler = scheduler(&world);
        let mut broken = world.trigger.clone();
        broken.settings = json!({ "cron": "every day at noon" });
        world.store.add_trigger(broken.clone());

        let first = scheduler.sync().await.expect("sync");
        let second = scheduler.sync().await.expect("sync");
        assert_eq!(first.failed, 1);
        assert_eq!(second, SyncSummary::default());
        assert!(!scheduler.is_scheduled(broken.id));

        broken.settings = json!({ "cron": "* * * * *" });
        world.store.add_trigger(broken.clone());
        let fixed = scheduler.sync().await.expect("sync");

        assert_eq!(fixed.scheduled, 1);
        assert!(scheduler.is_scheduled(broken.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_activation_and_deactivation_leave_no_orphan_schedule() {
        let world = firing_world(0);
        let scheduler = Arc::new(scheduler(&world));

        let workers = (0..8).map(|worker| {
            let scheduler = Arc::clone(&scheduler);
            let trigger = world.trigger.clone();
            tokio::spawn(async move {
                for round in 0..200 {
                    if (worker + round) % 2 == 0 {
                        scheduler.activate(&trigger).expect("activate");
                    } else {
                        scheduler.deactivate(trigger.id);
                    }
                }
            })
        });
        for worker in futures::future::join_all(workers).await {
            worker.expect("worker");
        }

        assert_eq!(scheduler.registry.len(), scheduler.len());
        assert!(scheduler.len() <= 1);
        scheduler.shutdown().await;
    }
}
