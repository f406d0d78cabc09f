use std::{collections::HashMap, path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use crate::{
    source_control::SourceControl,
    types::{CreatePullRequest, PullRequest, Repository, Task},
    workspace::Workspaces,
};

/// Publishes task branches and opens one pull request per changed repository.
pub struct PullRequestService {
    source_control: Arc<dyn SourceControl>,
    workspaces: Arc<dyn Workspaces>,
    bot_name: String,
}

impl PullRequestService {
    pub fn new(
        source_control: Arc<dyn SourceControl>,
        workspaces: Arc<dyn Workspaces>,
        bot_name: impl Into<String>,
    ) -> Self {
        Self {
            source_control,
            workspaces,
            bot_name: bot_name.into(),
        }
    }

    /// Processes `repositories` in order; repositories whose branch has not
    /// diverged are skipped. Each pull request body links the ones created
    /// before it.
    pub async fn create_pull_requests_for_repositories(
        &self,
        task: &Task,
        repositories: &[Repository],
        workspace_paths: &HashMap<String, PathBuf>,
    ) -> Result<Vec<PullRequest>> {
        let branch = task.branch();
        let mut created: Vec<PullRequest> = Vec::new();

        for repository in repositories {
            let path = workspace_paths
                .get(&repository.full_name)
                .ok_or_else(|| anyhow!("no workspace prepared for {}", repository.full_name))?;

            if !self
                .workspaces
                .has_branch_diverged(path, &repository.default_branch)
                .await?
            {
                debug!(repository = %repository.full_name, "branch has not diverged, no pull request");
                continue;
            }

            self.source_control
                .push_branch(path, &branch)
                .await
                .with_context(|| format!("failed to push {branch} to {}", repository.full_name))?;

            let (owner, repo) = repository.owner_and_name()?;
            let pull_request = self
                .source_control
                .create_pull_request(CreatePullRequest {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    title: format!("[{}] {}", self.bot_name, task.ticket.title),
                    body: build_pull_request_body(task, &created, &self.bot_name),
                    head: branch.clone(),
                    base: repository.default_branch.clone(),
                })
                .await
                .with_context(|| format!("failed to open pull request on {}", repository.full_name))?;

            info!(
                task_id = %task.id,
                repository = %repository.full_name,
                url = %pull_request.url,
                "pull request created"
            );
            created.push(pull_request);
        }

        Ok(created)
    }
}

/// Markdown body for a task's pull request. `siblings` are pull requests
/// already opened for the same task in other repositories.
pub fn build_pull_request_body(task: &Task, siblings: &[PullRequest], bot_name: &str) -> String {
    let ticket = &task.ticket;
    let mut lines = vec![
        "## Ticket".to_string(),
        format!("- **ID**: {}", ticket.external_id),
        format!("- **Title**: {}", ticket.title),
    ];
    if let Some(url) = &ticket.url {
        lines.push(format!("- **Link**: {url}"));
    }

    if let Some(assessment) = &task.assessment {
        lines.push(String::new());
        lines.push("## Assessment".into());
        lines.push(format!("- **Confidence**: {}/100", assessment.confidence));
        lines.push(format!("- **Scope**: {}", assessment.scope));
        lines.push(format!("- **Reasoning**: {}", assessment.reasoning));
        if !assessment.risk_factors.is_empty() {
            lines.push(format!(
                "- **Risk Factors**: {}",
                assessment.risk_factors.join(", ")
            ));
        }
    }

    if let Some(summary) = task.result.as_ref().map(|r| r.summary.trim()) {
        if !summary.is_empty() {
            lines.push(String::new());
            lines.push("## Summary".into());
            lines.push(summary.to_string());
        }
    }

    if !siblings.is_empty() {
        lines.push(String::new());
        lines.push("## Related Pull Requests".into());
        lines.extend(siblings.iter().map(|pr| format!("- {}", pr.url)));
    }

    lines.push(String::new());
    lines.push("---".into());
    lines.push(format!(
        "*This pull request was created automatically by {bot_name}.*"
    ));
    lines.join("\n")
}
