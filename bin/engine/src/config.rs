//! Engine configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (`SCHEDULER__RUN_TIMEOUT_SECONDS=90`).

use serde::Deserialize;
use std::time::Duration;
use triggermenot_integration::{GoogleOAuthConfig, MicrosoftOAuthConfig};

/// Engine configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Google OAuth client. Left empty, Google tokens are never refreshed.
    #[serde(default)]
    pub google: GoogleOAuthConfig,

    /// Microsoft OAuth client. Left empty, Microsoft tokens are never refreshed.
    #[serde(default)]
    pub microsoft: MicrosoftOAuthConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

/// Time budgets of trigger runs and the activation re-sync period.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on one poll cycle, token refresh included.
    #[serde(default = "default_run_timeout_seconds")]
    pub run_timeout_seconds: u64,

    /// Upper bound on one action execution.
    #[serde(default = "default_action_timeout_seconds")]
    pub action_timeout_seconds: u64,

    /// How often schedules are reconciled with the stored active instances.
    #[serde(default = "default_sync_interval_seconds")]
    pub sync_interval_seconds: u64,
}

fn default_run_timeout_seconds() -> u64 {
    120
}

fn default_action_timeout_seconds() -> u64 {
    60
}

fn default_sync_interval_seconds() -> u64 {
    30
}

impl SchedulerConfig {
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_seconds)
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_seconds.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_timeout_seconds: default_run_timeout_seconds(),
            action_timeout_seconds: default_action_timeout_seconds(),
            sync_interval_seconds: default_sync_interval_seconds(),
        }
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Timeout applied to every provider, token and action request.
    #[serde(default = "default_http_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_http_timeout_seconds() -> u64 {
    30
}

impl HttpConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_http_timeout_seconds(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::load(
            config::Environment::default()
                .separator("__")
                .try_parsing(true),
        )
    }

    fn load<S>(source: S) -> Result<Self, config::ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn from_json(json: &str) -> Result<EngineConfig, config::ConfigError> {
        EngineConfig::load(File::from_str(json, FileFormat::Json))
    }

    #[test]
    fn optional_sections_have_defaults() {
        let config = from_json(r#"{ "database_url": "postgres://localhost/tmn" }"#)
            .expect("config");

        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.http.timeout(), Duration::from_secs(30));
        assert_eq!(config.scheduler.run_timeout(), Duration::from_secs(120));
        assert_eq!(config.scheduler.action_timeout(), Duration::from_secs(60));
        assert_eq!(config.scheduler.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.microsoft.tenant, "common");
        assert!(config.google.client_id.is_none());
    }

    #[test]
    fn nested_values_override_defaults() {
        let config = from_json(
            r#"{
                "database_url": "postgres://localhost/tmn",
                "scheduler": { "run_timeout_seconds": 15, "sync_interval_seconds": 0 },
                "microsoft": { "client_id": "ms-app", "client_secret": "s3", "tenant": "contoso" }
            }"#,
        )
        .expect("config");

        assert_eq!(config.scheduler.run_timeout_seconds, 15);
        assert_eq!(config.scheduler.action_timeout_seconds, 60);
        assert_eq!(config.scheduler.sync_interval(), Duration::from_secs(1));
        assert_eq!(config.microsoft.client_id.as_deref(), Some("ms-app"));
        assert_eq!(config.microsoft.tenant, "contoso");
    }

    #[test]
    fn database_url_is_required() {
        assert!(from_json("{}").is_err());
    }
}
