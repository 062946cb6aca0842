//! TriggerMeNot engine.
//!
//! Loads every active trigger instance, polls each on its cron schedule and
//! runs the linked actions when a condition fires. Instances activated,
//! edited or deactivated while running are picked up by a periodic re-sync.
//! Stops on SIGINT/SIGTERM.

mod config;
mod db;
mod error;

use crate::config::EngineConfig;
use crate::db::{CredentialRepository, PlaygroundRepository};
use crate::error::StartupError;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use triggermenot_integration::{
    OAuthClient, OAuthError, OAuthRefresher, PollerSet, TokenLifecycleManager,
};
use triggermenot_scheduler::{CronRegistry, SystemClock, TaskFactory, TriggerScheduler};
use triggermenot_workflow::action::{HttpRequestHandler, OutlookSendMailHandler};
use triggermenot_workflow::{ActionHandlers, TriggerDispatcher};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(report) = run().await {
        error!(error = %report, "engine stopped");
        std::process::exit(1);
    }
}

async fn run() -> triggermenot_core::Result<(), StartupError> {
    let config = EngineConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    info!("Loaded configuration");

    let http = reqwest::Client::builder()
        .timeout(config.http.timeout())
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| StartupError::HttpClient {
            details: e.to_string(),
        })?;

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migration {
            details: e.to_string(),
        })?;

    let credentials = Arc::new(CredentialRepository::new(db_pool.clone()));
    let playgrounds = Arc::new(PlaygroundRepository::new(db_pool));

    let refresher = oauth_refresher(&config, http.clone())?;
    let tokens = Arc::new(TokenLifecycleManager::new(credentials, Arc::new(refresher)));

    let handlers = ActionHandlers::new()
        .with(Arc::new(HttpRequestHandler::new(http.clone())))
        .with(Arc::new(OutlookSendMailHandler::new(
            http.clone(),
            playgrounds.clone(),
            tokens.clone(),
        )));
    let dispatcher = TriggerDispatcher::new(
        playgrounds.clone(),
        handlers,
        config.scheduler.action_timeout(),
    );
    let factory = Arc::new(TaskFactory::new(
        playgrounds.clone(),
        tokens,
        PollerSet::standard(http),
        dispatcher,
        config.scheduler.run_timeout(),
    ));
    let scheduler = Arc::new(TriggerScheduler::new(
        CronRegistry::new(Arc::new(SystemClock)),
        factory,
        playgrounds,
    ));

    let scheduled = scheduler
        .rehydrate()
        .await
        .map_err(|e| StartupError::Rehydrate {
            details: e.to_string(),
        })?;
    info!(scheduled, "engine running");

    // Spawn periodic re-sync with the stored trigger instances
    let sync_scheduler = Arc::clone(&scheduler);
    let sync_interval = config.scheduler.sync_interval();
    let sync_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sync_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already synced.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = sync_scheduler.sync().await {
                warn!(error = %e, "failed to sync trigger schedules");
            }
        }
    });

    shutdown_signal().await;

    info!("shutting down, cancelling schedules");
    sync_task.abort();
    scheduler.shutdown().await;
    Ok(())
}

/// Registers a token endpoint client for every configured service.
///
/// A service without client credentials is left out; refreshing its
/// tokens then fails and its triggers skip their runs.
fn oauth_refresher(
    config: &EngineConfig,
    http: reqwest::Client,
) -> triggermenot_core::Result<OAuthRefresher, StartupError> {
    let mut refresher = OAuthRefresher::new(http);
    for client in [
        OAuthClient::google(&config.google),
        OAuthClient::microsoft(&config.microsoft),
    ] {
        match client {
            Ok(client) => {
                info!(service = %client.service(), "OAuth client configured");
                refresher = refresher.with_client(client);
            }
            Err(report) => match report.current_context() {
                OAuthError::NotConfigured { service } => {
                    info!(%service, "OAuth client not configured, token refresh disabled");
                }
                other => {
                    return Err(StartupError::OAuth {
                        details: other.to_string(),
                    }
                    .into());
                }
            },
        }
    }
    Ok(refresher)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
