//! Core domain types and utilities for the TriggerMeNot engine.
//!
//! This crate provides the identifiers, the set of supported external
//! services, and the error handling foundation shared by every other crate.

pub mod error;
pub mod id;
pub mod service;

pub use error::Result;
pub use id::{ActionInstanceId, ParseIdError, PlaygroundId, TriggerInstanceId, UserId};
pub use service::{ParseServiceError, ServiceKind};
