mod logging;
mod routes;

use std::{sync::Arc, time::Duration};

use anabranch_core::{
    assessment::AssessmentService,
    config::Config,
    execution::ExecutionService,
    git::Git,
    orchestrator,
    processor::TaskProcessor,
    pull_request::PullRequestService,
    queue::TaskQueue,
    source_control::SourceControl,
    ticketing::TicketSource,
    workspace::{WorkspaceManager, Workspaces},
};
use anabranch_providers::{GitHubProvider, JiraTicketSource};
use anyhow::Context;
use tracing::{error, info, warn};

use routes::AppState;

/// Hard deadline after a shutdown signal.
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(10);

// ── main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.log_level, config.log_format);
    config.validate().context("invalid configuration")?;

    info!(
        agent = %config.agent_provider,
        workspace = %config.workspace_path.display(),
        "starting anabranch"
    );

    // Source control and agent
    let github: Arc<dyn SourceControl> = Arc::new(
        GitHubProvider::from_config(&config.github)?.with_git(Git::new().with_timeout(config.git_timeout())),
    );
    let agent = anabranch_agent::from_config(&config);
    if !agent.is_available().await {
        warn!(agent = agent.name(), "agent CLI not found on PATH; tasks will fail until it is installed");
    }

    // Workspaces
    let workspace_manager = WorkspaceManager::new(&config.workspace_path, Arc::clone(&github))
        .with_git(Git::new().with_timeout(config.git_timeout()))
        .with_author(&config.bot_name, &config.bot_email);
    workspace_manager
        .initialize()
        .await
        .context("failed to initialise workspace")?;
    let workspaces: Arc<dyn Workspaces> = Arc::new(workspace_manager);

    // Services
    let assessment = Arc::new(AssessmentService::new(
        Arc::clone(&agent),
        Arc::clone(&github),
        config.assessment.clone(),
    ));
    let pull_requests = PullRequestService::new(Arc::clone(&github), Arc::clone(&workspaces), &config.bot_name);
    let execution = Arc::new(
        ExecutionService::new(
            Arc::clone(&agent),
            Arc::clone(&workspaces),
            pull_requests,
            config.execution.clone(),
        )
        .with_model(config.agent_model.clone()),
    );

    // Queue and processor
    let queue = Arc::new(TaskQueue::new());
    let orchestrator = orchestrator::from_kind(config.orchestrator, assessment, execution);
    let processor = TaskProcessor::start(Arc::clone(&queue), orchestrator);

    // Ticket sources
    let jira: Option<Arc<dyn TicketSource>> = if config.jira.enabled {
        if config.jira.webhook_secret.is_empty() {
            warn!("JIRA_WEBHOOK_SECRET is empty; webhook signatures will not be checked");
        }
        Some(Arc::new(JiraTicketSource::new(
            &config.jira.webhook_secret,
            config.jira.filter.clone(),
            Arc::clone(&queue),
        )))
    } else {
        info!("jira ingestion disabled");
        None
    };

    let state = Arc::new(AppState {
        queue,
        processor: Arc::clone(&processor),
        jira,
        agent_provider: config.agent_provider.to_string(),
    });
    let app = routes::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("http server stopped, waiting for the running task");
    processor.wait_idle().await;
    info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM and arms the force-exit watchdog.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    tokio::spawn(async {
        tokio::time::sleep(FORCE_EXIT_AFTER).await;
        error!("graceful shutdown timed out after {}s, forcing exit", FORCE_EXIT_AFTER.as_secs());
        std::process::exit(1);
    });
}
