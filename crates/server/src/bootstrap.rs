use std::sync::Arc;
use std::time::Duration;

use approvey_core::audit::AuditSink;
use approvey_core::config::{AppConfig, ConfigError, NotificationConfig};
use approvey_core::{
    Dispatcher, NcrMailboxes, NotificationPort, PolicySelector, PolicySettings, SubmissionService,
};
use approvey_db::{connect_with_config, migrations, DbPool, SqlProposalStore};
use thiserror::Error;
use tracing::info;

use crate::audit::TracingAuditSink;
use crate::notifier::{LogNotificationPort, RelayNotificationPort};
use crate::routes::RoutesState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub dispatcher: Arc<Dispatcher>,
    pub submissions: Arc<SubmissionService>,
    pub notifier_kind: &'static str,
}

impl Application {
    pub fn routes_state(&self) -> RoutesState {
        RoutesState::new(self.submissions.clone())
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("notification relay client could not be built: {0}")]
    Notifier(#[source] reqwest::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let (notifier, notifier_kind) = build_notifier(&config.notifications)?;
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let selector = PolicySelector::new(PolicySettings {
        approval_notice: config.notifications.approval_notice,
    });
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(selector),
        Arc::new(SqlProposalStore::new(db_pool.clone())),
        notifier,
        audit.clone(),
    ));
    let submissions = Arc::new(SubmissionService::new(
        dispatcher.clone(),
        audit,
        NcrMailboxes::from(&config.ncr),
    ));

    Ok(Application { config, db_pool, dispatcher, submissions, notifier_kind })
}

fn build_notifier(
    config: &NotificationConfig,
) -> Result<(Arc<dyn NotificationPort>, &'static str), BootstrapError> {
    match (&config.relay_url, &config.relay_api_key) {
        (Some(relay_url), Some(api_key)) => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.relay_timeout_secs))
                .build()
                .map_err(BootstrapError::Notifier)?;
            let relay = RelayNotificationPort::new(
                client,
                relay_url.clone(),
                api_key.clone(),
                config.sender_address.clone(),
                config.response_base_url.clone(),
            );
            Ok((Arc::new(relay), "relay"))
        }
        _ => Ok((Arc::new(LogNotificationPort), "log")),
    }
}
