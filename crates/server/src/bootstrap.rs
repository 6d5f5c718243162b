use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use penny_agent::{
    AnalysisExecutor, ConversationExecutor, IntentClassifier, LlmClient, NoopLlmClient,
    OllamaClient, SubprocessAnalysisDelegate, TurnOrchestrator,
};
use penny_core::config::{AppConfig, ConfigError, LlmProvider, LoadOptions};
use penny_core::persona::PersonaPromptBuilder;
use penny_db::repositories::{SqlContextStore, SqlDatasetRepository, SqlTurnRepository};
use penny_db::{connect, migrations, DbPool};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<TurnOrchestrator>,
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
    LlmInit(String),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let llm = build_llm_client(&config)?;
    let llm_timeout = Duration::from_secs(config.llm.timeout_secs);
    let persona = config.persona.profile();

    let delegate = SubprocessAnalysisDelegate::new(
        config.analysis.executable.clone(),
        Duration::from_secs(config.analysis.timeout_secs),
        config.analysis.stderr_truncate_bytes,
    );

    let orchestrator = TurnOrchestrator::new(
        IntentClassifier::new(llm.clone(), llm_timeout),
        ConversationExecutor::new(
            llm,
            PersonaPromptBuilder::new(persona.clone(), config.retrieval.context_budget_chars),
            llm_timeout,
            config.llm.max_retries,
        ),
        AnalysisExecutor::new(Arc::new(delegate), persona.clone()),
        persona,
        Arc::new(SqlTurnRepository::new(db_pool.clone())),
        Arc::new(SqlDatasetRepository::new(db_pool.clone())),
        Arc::new(SqlContextStore::new(db_pool.clone())),
        config.retrieval.clone(),
        config.analysis.spool_dir.clone(),
    );

    Ok(Application { config, db_pool, orchestrator: Arc::new(orchestrator) })
}

fn build_llm_client(config: &AppConfig) -> Result<Arc<dyn LlmClient>, BootstrapError> {
    match config.llm.provider {
        LlmProvider::Ollama => {
            let base_url = config
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            let client = OllamaClient::new(
                base_url,
                config.llm.model.clone(),
                config.llm.api_key.clone(),
                Duration::from_secs(config.llm.timeout_secs),
            )
            .map_err(|error| BootstrapError::LlmInit(error.to_string()))?;
            Ok(Arc::new(client))
        }
        provider => {
            // Only the local generate endpoint is wired up today; other
            // providers run with the LLM disabled so the persona fallbacks
            // carry the conversation.
            warn!(
                event_name = "system.bootstrap.llm_disabled",
                provider = ?provider,
                "no client for configured llm provider, running degraded"
            );
            Ok(Arc::new(NoopLlmClient))
        }
    }
}
