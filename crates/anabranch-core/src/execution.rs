use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};

use crate::{
    agent::CodingAgent,
    config::ExecutionConfig,
    pull_request::PullRequestService,
    retry::retry,
    types::{AgentConfig, AgentResult, PullRequest, Repository, Task},
    workspace::Workspaces,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The agent finished and asked for pull requests. Zero pull requests
    /// means no repository changed.
    Completed,
    /// The agent finished but chose not to open pull requests.
    Declined { reason: String },
}

struct Attempt {
    result: AgentResult,
    pull_requests: Vec<PullRequest>,
}

/// Runs the agent against prepared workspaces and turns its changes into
/// pull requests. Workspaces are always torn down, whatever the outcome.
pub struct ExecutionService {
    agent: Arc<dyn CodingAgent>,
    workspaces: Arc<dyn Workspaces>,
    pull_requests: PullRequestService,
    config: ExecutionConfig,
    model: Option<String>,
}

impl ExecutionService {
    pub fn new(
        agent: Arc<dyn CodingAgent>,
        workspaces: Arc<dyn Workspaces>,
        pull_requests: PullRequestService,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            agent,
            workspaces,
            pull_requests,
            config,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Executes `task` against `repositories`, retrying the whole operation
    /// up to the configured retry count. On success the agent result and
    /// created pull requests are recorded on the task.
    pub async fn execute(
        &self,
        task: &mut Task,
        repositories: &[Repository],
    ) -> Result<ExecutionOutcome> {
        if task.result.is_some() {
            bail!("task {} was already executed", task.id);
        }

        let snapshot: &Task = task;
        let attempt = retry(
            self.config.retries,
            move |n| self.run_attempt(snapshot, repositories, n),
            |n, e| {
                warn!(task_id = %snapshot.id, attempt = n, "execution attempt failed, retrying: {e:#}");
            },
        )
        .await?;

        let outcome = if attempt.result.create_pull_request {
            ExecutionOutcome::Completed
        } else {
            ExecutionOutcome::Declined {
                reason: attempt
                    .result
                    .skip_reason
                    .clone()
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "agent declined without giving a reason".into()),
            }
        };

        task.result = Some(attempt.result);
        task.pull_requests.extend(attempt.pull_requests);
        Ok(outcome)
    }

    async fn run_attempt(
        &self,
        task: &Task,
        repositories: &[Repository],
        attempt: u32,
    ) -> Result<Attempt> {
        info!(task_id = %task.id, attempt, repositories = repositories.len(), "starting execution attempt");

        let mut prepared: Vec<(Repository, PathBuf)> = Vec::with_capacity(repositories.len());
        let result = self.work(task, repositories, &mut prepared).await;

        for (repository, path) in &prepared {
            if let Err(e) = self.workspaces.cleanup_workspace(path).await {
                warn!(
                    repository = %repository.full_name,
                    path = %path.display(),
                    "failed to clean up workspace: {e:#}"
                );
            }
        }

        result
    }

    async fn work(
        &self,
        task: &Task,
        repositories: &[Repository],
        prepared: &mut Vec<(Repository, PathBuf)>,
    ) -> Result<Attempt> {
        for repository in repositories {
            let path = self
                .workspaces
                .prepare_workspace(repository, &task.id)
                .await
                .with_context(|| format!("failed to prepare workspace for {}", repository.full_name))?;
            prepared.push((repository.clone(), path));
        }

        let paths: Vec<PathBuf> = prepared.iter().map(|(_, p)| p.clone()).collect();
        let agent_config = AgentConfig {
            model: self.model.clone(),
            max_file_changes: self.config.max_file_changes,
            timeout_minutes: self.config.timeout_minutes,
        };

        let result = tokio::time::timeout(
            self.config.timeout(),
            self.agent
                .execute(&task.ticket, &paths, task.assessment.as_ref(), &agent_config),
        )
        .await
        .map_err(|_| anyhow!("agent timed out after {}m", self.config.timeout_minutes))?
        .with_context(|| format!("{} execution failed", self.agent.name()))?;

        if !result.completed {
            bail!("agent execution failed: {}", result.summary);
        }

        if !result.create_pull_request {
            info!(task_id = %task.id, reason = ?result.skip_reason, "agent declined to open pull requests");
            return Ok(Attempt {
                result,
                pull_requests: Vec::new(),
            });
        }

        let message = format!("{}: {}", task.ticket.external_id, task.ticket.title);
        let mut changed = Vec::new();
        let mut workspace_paths = HashMap::new();
        for (repository, path) in prepared.iter() {
            if self.workspaces.has_uncommitted_changes(path).await? {
                self.workspaces
                    .commit_changes(path, &message)
                    .await
                    .with_context(|| format!("failed to commit changes in {}", repository.full_name))?;
            }
            if self
                .workspaces
                .has_branch_diverged(path, &repository.default_branch)
                .await?
            {
                changed.push(repository.clone());
            }
            workspace_paths.insert(repository.full_name.clone(), path.clone());
        }

        info!(
            task_id = %task.id,
            changed = changed.len(),
            cost = ?result.cost_in_dollars,
            "agent finished"
        );

        let mut with_result = task.clone();
        with_result.result = Some(result.clone());
        let pull_requests = self
            .pull_requests
            .create_pull_requests_for_repositories(&with_result, &changed, &workspace_paths)
            .await?;

        Ok(Attempt {
            result,
            pull_requests,
        })
    }
}
