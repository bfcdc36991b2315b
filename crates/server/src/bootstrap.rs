//! Startup wiring: config, database, repositories, agent, services.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use scout_agent::conversation::ChatOrchestrator;
use scout_agent::email::{Mailer, ResendMailer};
use scout_agent::llm::{LlmClient, LlmError, OpenAiClient};
use scout_agent::tools::{procurement_registry, ToolDeps};
use scout_core::config::{AppConfig, ConfigError, LoadOptions};
use scout_core::pricing::PriceExtractor;
use scout_db::repositories::{
    SqlCatalogRepository, SqlMessageRepository, SqlOrderRepository, SqlProcurementRepository,
    SqlResponseRepository, SqlSessionRepository,
};
use scout_db::{connect_with_settings, migrations, DbPool};

use crate::api::AppState;
use crate::chat::ChatService;
use crate::sessions::SessionService;
use crate::tracker::ProcurementTracker;
use crate::webhook::WebhookState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api_state: AppState,
    pub webhook_state: WebhookState,
    pub tracker: Arc<ProcurementTracker>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("llm client initialization failed: {0}")]
    Llm(#[source] LlmError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!("starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!("database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!("database migrations applied");

    let catalog = Arc::new(SqlCatalogRepository::new(db_pool.clone()));
    let orders = Arc::new(SqlOrderRepository::new(db_pool.clone()));
    let responses = Arc::new(SqlResponseRepository::new(db_pool.clone()));
    let procurement = Arc::new(SqlProcurementRepository::new(db_pool.clone()));
    let session_repo = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let message_repo = Arc::new(SqlMessageRepository::new(db_pool.clone()));

    // A missing model or email key is preview/degraded mode, not a startup
    // failure; a present-but-broken llm config is.
    let llm: Option<Arc<dyn LlmClient>> = if config.llm.is_configured() {
        Some(Arc::new(OpenAiClient::from_config(&config.llm).map_err(BootstrapError::Llm)?))
    } else {
        info!("no llm configured; agent will answer in preview mode");
        None
    };
    let mailer: Option<Arc<dyn Mailer>> = match ResendMailer::from_config(&config.email) {
        Some(resend) => Some(Arc::new(resend)),
        None => {
            info!("no email api key configured; outreach tools disabled");
            None
        }
    };

    let registry = procurement_registry(ToolDeps {
        catalog,
        orders,
        responses: responses.clone(),
        procurement: procurement.clone(),
        mailer: mailer.clone(),
        request_ttl_days: config.tracker.request_ttl_days,
    });
    let orchestrator = Arc::new(ChatOrchestrator::new(llm, Arc::new(registry)));

    let sessions = Arc::new(SessionService::new(
        session_repo,
        message_repo.clone(),
        config.llm.model.clone(),
    ));
    let chat = Arc::new(ChatService::new(sessions.clone(), message_repo, orchestrator));
    let tracker = Arc::new(ProcurementTracker::new(
        procurement,
        responses.clone(),
        chat.clone(),
    ));

    let api_state = AppState { chat, sessions };
    let webhook_state = WebhookState {
        responses,
        mailer,
        tracker: tracker.clone(),
        extractor: Arc::new(PriceExtractor::new()),
    };

    Ok(Application { config, db_pool, api_state, webhook_state, tracker })
}
