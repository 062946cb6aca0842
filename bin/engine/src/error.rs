//! Startup errors of the engine binary.

use std::fmt;

/// Failures that keep the engine from starting.
#[derive(Debug)]
pub enum StartupError {
    /// Configuration is missing or invalid.
    Config { details: String },
    /// The shared HTTP client could not be built.
    HttpClient { details: String },
    /// The database could not be reached.
    Database { details: String },
    /// Schema migrations failed.
    Migration { details: String },
    /// An OAuth client is configured but unusable.
    OAuth { details: String },
    /// Active trigger instances could not be loaded.
    Rehydrate { details: String },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {}", details),
            Self::HttpClient { details } => write!(f, "failed to build HTTP client: {}", details),
            Self::Database { details } => write!(f, "failed to connect to database: {}", details),
            Self::Migration { details } => write!(f, "failed to run migrations: {}", details),
            Self::OAuth { details } => write!(f, "invalid OAuth client: {}", details),
            Self::Rehydrate { details } => {
                write!(f, "failed to load active triggers: {}", details)
            }
        }
    }
}

impl std::error::Error for StartupError {}
