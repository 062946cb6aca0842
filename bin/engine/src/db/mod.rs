//! Database repositories backing the engine's storage seams.
//!
//! This module provides data access for:
//! - OAuth credentials per (user, service)
//! - Playgrounds with their trigger instances, action instances and links

pub mod credential;
pub mod playground;

pub use credential::CredentialRepository;
pub use playground::PlaygroundRepository;
