//! Playground model and trigger dispatch for TriggerMeNot.
//!
//! This crate provides:
//!
//! - **Model**: trigger instances, action instances and the links between them
//! - **Store**: the storage seam the engine reads playgrounds through
//! - **Actions**: handlers for each action kind
//! - **Dispatcher**: fan-out of a firing to every linked action

pub mod action;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use action::{ActionHandler, ActionHandlers, ActionKind};
pub use dispatcher::{ActionOutcome, Dispatch, TriggerDispatcher};
pub use error::{ActionError, DispatchError, StoreError};
pub use model::{ActionInstance, TriggerInstance, TriggerLink};
pub use store::PlaygroundStore;
