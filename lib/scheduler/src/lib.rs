//! Scheduling for trigger instances.
//!
//! This crate provides:
//!
//! - **Cron Registry**: recurring tasks keyed by cron expression, with
//!   cancellation and overlap protection
//! - **Task Factory**: the poll-then-dispatch cycle of one trigger instance
//! - **Trigger Scheduler**: activation, deactivation, startup rehydration and
//!   periodic re-sync with the stored instances

pub mod activation;
pub mod error;
pub mod factory;
pub mod registry;
pub mod schedule;

pub use activation::{SyncSummary, TriggerScheduler};
pub use error::{ScheduleError, SchedulerError};
pub use factory::{RunOutcome, TaskFactory, TriggerTask};
pub use registry::{Clock, CronRegistry, ScheduledFn, SystemClock, TaskHandle, VirtualClock};
pub use schedule::CronSchedule;
