//! In-process cron registry.
//!
//! Every registration owns one tokio task that sleeps until the next due
//! instant of its schedule and then launches a run. Runs are spawned apart
//! from the schedule loop, so a failing or panicking run cannot stop its
//! registration, and a run still active at the next instant causes that
//! instant to be skipped rather than overlapped.

use crate::error::ScheduleError;
use crate::schedule::CronSchedule;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};
use ulid::Ulid;

/// Wall-clock source for schedule evaluation.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// The runtime instant at which wall-clock time reaches `at`.
    fn deadline(&self, at: DateTime<Utc>) -> Instant;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn deadline(&self, at: DateTime<Utc>) -> Instant {
        let wait = (at - Utc::now()).to_std().unwrap_or_default();
        Instant::now() + wait
    }
}

/// Wall-clock time derived from tokio's clock.
///
/// Anchors a wall-clock time to the tokio instant of creation, so pausing
/// and advancing tokio time moves this clock too.
#[derive(Debug, Clone, Copy)]
pub struct VirtualClock {
    anchor_wall: DateTime<Utc>,
    anchor_instant: Instant,
}

impl VirtualClock {
    #[must_use]
    pub fn new(anchor_wall: DateTime<Utc>) -> Self {
        Self {
            anchor_wall,
            anchor_instant: Instant::now(),
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().duration_since(self.anchor_instant);
        self.anchor_wall + chrono::Duration::from_std(elapsed).unwrap_or_default()
    }

    fn deadline(&self, at: DateTime<Utc>) -> Instant {
        let offset = (at - self.anchor_wall).to_std().unwrap_or_default();
        self.anchor_instant + offset
    }
}

/// A recurring unit of work. Each call produces one run.
pub type ScheduledFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Identifies a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(Ulid);

impl TaskHandle {
    fn new() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{}", self.0)
    }
}

struct Registration {
    // Dropping the sender stops the loop.
    _stop: watch::Sender<()>,
    loop_task: JoinHandle<()>,
}

/// Registry of recurring tasks.
pub struct CronRegistry {
    clock: Arc<dyn Clock>,
    registrations: Mutex<HashMap<TaskHandle, Registration>>,
}

impl CronRegistry {
    /// Creates a registry driven by `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<TaskHandle, Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `task` to run at every instant of `expression`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCronExpression` if the expression does not parse.
    pub fn register_task(
        &self,
        expression: &str,
        task: ScheduledFn,
    ) -> Result<TaskHandle, Report<ScheduleError>> {
        let schedule = CronSchedule::parse(expression)?;
        let handle = TaskHandle::new();
        let (stop_tx, stop_rx) = watch::channel(());

        let span = info_span!("schedule", task = %handle, cron = %schedule.expression());
        let loop_task = tokio::spawn(
            schedule_loop(schedule, task, Arc::clone(&self.clock), stop_rx).instrument(span),
        );

        self.registrations().insert(
            handle,
            Registration {
                _stop: stop_tx,
                loop_task,
            },
        );
        debug!(task = %handle, cron = expression, "task registered");
        Ok(handle)
    }

    /// Stops future instants of a registration.
    ///
    /// A run already in flight completes. Returns false for unknown handles.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let removed = self.registrations().remove(&handle);
        match removed {
            Some(registration) => {
                drop(registration);
                debug!(task = %handle, "task cancelled");
                true
            }
            None => false,
        }
    }

    /// Returns whether the handle is registered.
    #[must_use]
    pub fn contains(&self, handle: TaskHandle) -> bool {
        self.registrations().contains_key(&handle)
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every registration and waits for their loops to stop.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.registrations().drain().collect();
        let count = drained.len();
        let loops: Vec<_> = drained
            .into_iter()
            .map(|(_, Registration { _stop, loop_task })| {
                drop(_stop);
                loop_task
            })
            .collect();
        futures::future::join_all(loops).await;
        info!(count, "cron registry shut down");
    }
}

/// Clears the running flag when a run ends, panics included.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn schedule_loop(
    schedule: CronSchedule,
    task: ScheduledFn,
    clock: Arc<dyn Clock>,
    mut stop: watch::Receiver<()>,
) {
    let running = Arc::new(AtomicBool::new(false));
    let mut after = clock.now();

    loop {
        let Some(due) = schedule.next_after(after) else {
            info!("schedule has no further instants");
            return;
        };

        tokio::select! {
            biased;
            _ = stop.changed() => return,
            () = tokio::time::sleep_until(clock.deadline(due)) => {}
        }

        let now = clock.now();
        let missed = schedule.count_between(due, now);
        if missed > 0 {
            warn!(%due, missed, "instants passed while the schedule was behind, skipping them");
        }
        // The wall clock can read slightly before `due` on wake-up.
        after = due.max(now);

        if running.swap(true, Ordering::AcqRel) {
            warn!(%due, "previous run still active, skipping instant");
            continue;
        }

        let guard = RunGuard(Arc::clone(&running));
        let run = task();
        tokio::spawn(
            async move {
                let _guard = guard;
                run.await;
            }
            .instrument(info_span!("run", %due)),
        );
    }
}
