//! incident-ops entrypoint: configuration, logging, persistence, adapter
//! wiring, the detection scheduler, and the admin HTTP server.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing_subscriber::EnvFilter;

use incident_ops::config::Config;
use incident_ops::services::{
    AnalysisEngine, AnalysisEngineConfig, BaselineEngine, Cache, DatadogClient, DatadogConfig,
    DbInvestigator, DbInvestigatorConfig, DetectionScheduler, GitlabClient, GitlabConfig,
    IncidentService, IncidentWorkflow, InvestigationConfig, InvestigationOrchestrator, MemoryCache,
    MetricsProvider, MonitorRegistry, MySqlInvestigator, Notifier, SourceControlProvider,
    SourcegraphClient, SourcegraphConfig, TeamsConfig, TeamsNotifier,
};
use incident_ops::services::llm::{BreakerConfig, LlmClientConfig, LlmProvider, OpenAiCompatibleClient};
use incident_ops::{AppState, build_router};

#[derive(Parser)]
#[command(name = "incident-ops", about = "Automated incident-response platform")]
struct Cli {
    /// Path to the configuration file (default: conf/config.toml)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;
    let _log_guard = init_tracing(&config.logging);

    tracing::info!("starting incident-ops on {}:{}", config.server.host, config.server.port);

    let pool = connect_database(&config.database.url).await?;
    IncidentService::init_schema(&pool).await?;

    let state = build_app_state(config, pool)?;

    state.registry.load().await?;
    state.scheduler.start().await;

    let app = build_router(state.clone());
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("admin API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    state.scheduler.stop().await;
    tracing::info!("incident-ops stopped");
    Ok(())
}

fn init_tracing(
    logging: &incident_ops::config::LoggingConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match &logging.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("logs"));
            let file_name =
                path.file_name().map(|f| f.to_string_lossy().into_owned()).unwrap_or_default();
            let appender = tracing_appender::rolling::daily(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        },
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        },
    }
}

async fn connect_database(url: &str) -> anyhow::Result<sqlx::SqlitePool> {
    // Make sure the parent directory exists for file-backed databases.
    if let Some(path) = url.strip_prefix("sqlite://")
        && path != ":memory:"
        && let Some(parent) = std::path::Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn build_app_state(config: Config, pool: sqlx::SqlitePool) -> anyhow::Result<Arc<AppState>> {
    let cache = Arc::new(MemoryCache::new());
    let cache_dyn: Arc<dyn Cache> = cache.clone();

    let metrics: Arc<dyn MetricsProvider> = Arc::new(DatadogClient::new(DatadogConfig {
        api_url: config.datadog.api_url.clone(),
        api_key: config.datadog.api_key.clone(),
        app_key: config.datadog.app_key.clone(),
        timeout_secs: config.datadog.timeout_secs,
    }));

    let source_control: Arc<dyn SourceControlProvider> = Arc::new(
        GitlabClient::new(GitlabConfig {
            api_url: config.gitlab.api_url.clone(),
            token: config.gitlab.token.clone(),
            timeout_secs: config.gitlab.timeout_secs,
        })
        .with_metadata_cache(cache_dyn.clone(), config.cache.repo_metadata_ttl_secs),
    );

    let code_search = Arc::new(
        SourcegraphClient::new(SourcegraphConfig {
            api_url: config.sourcegraph.api_url.clone(),
            token: config.sourcegraph.token.clone(),
            timeout_secs: config.sourcegraph.timeout_secs,
        })
        .with_result_cache(cache_dyn.clone(), config.cache.code_search_ttl_secs),
    );

    let db_investigator: Option<Arc<dyn DbInvestigator>> = if config.database_investigation.enabled
    {
        let investigator = MySqlInvestigator::new(&DbInvestigatorConfig {
            url: config.database_investigation.url.clone(),
            query_timeout_secs: config.database_investigation.query_timeout_secs,
        })?;
        Some(Arc::new(investigator))
    } else {
        None
    };

    let registry = Arc::new(MonitorRegistry::new(&config.monitors.file));
    let incidents = Arc::new(IncidentService::new(pool.clone()));

    let baselines = Arc::new(BaselineEngine::new(
        metrics.clone(),
        cache_dyn.clone(),
        config.cache.baseline_ttl_secs,
    ));

    let orchestrator = Arc::new(InvestigationOrchestrator::new(
        metrics.clone(),
        source_control,
        code_search,
        db_investigator,
        InvestigationConfig {
            collector_timeout_secs: config.investigation.collector_timeout_secs,
            commit_window_hours: config.investigation.commit_window_hours,
            recent_deployment_window_hours: config.investigation.recent_deployment_window_hours,
        },
    ));

    let llm: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatibleClient::new(LlmClientConfig {
        api_url: config.llm.api_url.clone(),
        api_key: config.llm.api_key.clone(),
        model: config.llm.model.clone(),
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
        timeout_secs: config.llm.timeout_secs,
    }));

    let analysis_engine = Arc::new(AnalysisEngine::new(
        llm,
        cache_dyn,
        Some(incidents.clone()),
        AnalysisEngineConfig {
            response_ttl_secs: config.llm.response_ttl_secs,
            cost_per_1k_input: config.llm.cost_per_1k_input,
            cost_per_1k_output: config.llm.cost_per_1k_output,
            breaker: BreakerConfig {
                failure_threshold: config.llm.breaker_failure_threshold,
                success_threshold: config.llm.breaker_success_threshold,
                open_timeout: Duration::from_secs(config.llm.breaker_open_timeout_secs),
            },
        },
    ));

    let notifier: Arc<dyn Notifier> = Arc::new(TeamsNotifier::new(TeamsConfig {
        default_webhook_url: config.teams.default_webhook_url.clone(),
        api_url: config.teams.api_url.clone(),
        token: config.teams.token.clone(),
        timeout_secs: config.teams.timeout_secs,
    }));

    let workflow = Arc::new(IncidentWorkflow::new(
        registry.clone(),
        orchestrator,
        analysis_engine,
        notifier,
        incidents.clone(),
    ));

    let scheduler = Arc::new(DetectionScheduler::new(
        registry.clone(),
        metrics,
        baselines,
        incidents.clone(),
        workflow,
    ));

    Ok(Arc::new(AppState { config, db: pool, cache, registry, incidents, scheduler }))
}
