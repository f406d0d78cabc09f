use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{error, info};

use crate::{
    assessment::AssessmentService,
    config::OrchestratorKind,
    execution::{ExecutionOutcome, ExecutionService},
    types::{Repository, Task, TaskStatus},
};

/// Drives one task from `queued` to a terminal status.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    fn name(&self) -> &str;

    /// Processes `task` to completion. Task-level failures are recorded on
    /// the task, not returned.
    async fn handle_task(&self, task: &mut Task) -> Result<()>;
}

/// The assess → gate → execute state machine.
pub struct TaskOrchestrator {
    assessment: Arc<AssessmentService>,
    execution: Arc<ExecutionService>,
}

impl TaskOrchestrator {
    pub fn new(assessment: Arc<AssessmentService>, execution: Arc<ExecutionService>) -> Self {
        Self {
            assessment,
            execution,
        }
    }

    async fn run(&self, task: &mut Task) -> Result<()> {
        let bypass = self.assessment.config().skip;
        task.advance(if bypass {
            TaskStatus::Executing
        } else {
            TaskStatus::Assessing
        })?;

        let repositories = self.assessment.list_repositories().await?;

        let targets: Vec<Repository> = if bypass {
            info!(task_id = %task.id, "assessment bypassed, executing against all repositories");
            repositories
        } else {
            let assessment = self.assessment.assess(task, &repositories).await?;

            if !self
                .assessment
                .passes_confidence_gate(assessment.confidence, assessment.scope)
            {
                info!(
                    task_id = %task.id,
                    confidence = assessment.confidence,
                    scope = %assessment.scope,
                    "task skipped: did not pass confidence gate"
                );
                task.skip(format!(
                    "confidence {} / scope {} did not pass the gate",
                    assessment.confidence, assessment.scope
                ))?;
                return Ok(());
            }

            if assessment.affected_repositories.is_empty() {
                info!(task_id = %task.id, "task skipped: no affected repositories identified");
                task.skip("no affected repositories identified")?;
                return Ok(());
            }

            let targets = select_targets(repositories, &assessment.affected_repositories);
            info!(
                task_id = %task.id,
                targets = targets.len(),
                affected = ?assessment.affected_repositories,
                "assessment passed"
            );

            task.advance(TaskStatus::Executing)?;
            targets
        };

        match self.execution.execute(task, &targets).await? {
            ExecutionOutcome::Completed => {
                task.advance(TaskStatus::Succeeded)?;
                info!(
                    task_id = %task.id,
                    pull_requests = task.pull_requests.len(),
                    "task succeeded"
                );
            }
            ExecutionOutcome::Declined { reason } => {
                info!(task_id = %task.id, reason = %reason, "task skipped: agent declined");
                task.skip(reason)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for TaskOrchestrator {
    fn name(&self) -> &str {
        "default"
    }

    async fn handle_task(&self, task: &mut Task) -> Result<()> {
        info!(task_id = %task.id, ticket = %task.ticket.external_id, "beginning task processing");

        if let Err(e) = self.run(task).await {
            let message = format!("{e:#}");
            error!(task_id = %task.id, status = %task.status, "task failed: {message}");
            task.fail(message);
        }
        Ok(())
    }
}

/// Narrows `repositories` to those the assessment named, matching either
/// `owner/name` or the bare name without regard to case. When nothing
/// matches, every managed repository is kept.
pub fn select_targets(repositories: Vec<Repository>, affected: &[String]) -> Vec<Repository> {
    let named = |r: &Repository| {
        affected.iter().any(|a| {
            let a = a.trim();
            a.eq_ignore_ascii_case(&r.full_name) || a.eq_ignore_ascii_case(&r.name)
        })
    };
    if !repositories.iter().any(named) {
        return repositories;
    }
    repositories.into_iter().filter(|r| named(r)).collect()
}

/// Builds the orchestrator selected by configuration.
pub fn from_kind(
    kind: OrchestratorKind,
    assessment: Arc<AssessmentService>,
    execution: Arc<ExecutionService>,
) -> Arc<dyn Orchestrator> {
    match kind {
        OrchestratorKind::Default => Arc::new(TaskOrchestrator::new(assessment, execution)),
    }
}
