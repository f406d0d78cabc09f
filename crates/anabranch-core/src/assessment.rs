use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;

use crate::{
    agent::CodingAgent,
    config::AssessmentConfig,
    source_control::SourceControl,
    types::{AssessmentResult, Repository, Task, TaskScope},
};

/// Asks the agent to evaluate tickets and decides whether the answer is
/// good enough to act on.
pub struct AssessmentService {
    agent: Arc<dyn CodingAgent>,
    source_control: Arc<dyn SourceControl>,
    config: AssessmentConfig,
}

impl AssessmentService {
    pub fn new(
        agent: Arc<dyn CodingAgent>,
        source_control: Arc<dyn SourceControl>,
        config: AssessmentConfig,
    ) -> Self {
        Self {
            agent,
            source_control,
            config,
        }
    }

    pub fn config(&self) -> &AssessmentConfig {
        &self.config
    }

    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        self.source_control.list_repositories().await
    }

    /// Runs the agent's assessment and stores it on `task`.
    pub async fn assess(
        &self,
        task: &mut Task,
        repositories: &[Repository],
    ) -> Result<AssessmentResult> {
        if task.assessment.is_some() {
            return Err(anyhow!("task {} was already assessed", task.id));
        }

        let timeout = std::time::Duration::from_secs(self.config.timeout_minutes.saturating_mul(60));
        let assessment = tokio::time::timeout(timeout, self.agent.assess(&task.ticket, repositories))
            .await
            .map_err(|_| anyhow!("assessment timed out after {}m", self.config.timeout_minutes))?
            .with_context(|| format!("{} failed to assess {}", self.agent.name(), task.ticket.external_id))?;
        assessment.validate()?;

        info!(
            task_id = %task.id,
            ticket = %task.ticket.external_id,
            confidence = assessment.confidence,
            scope = %assessment.scope,
            affected = ?assessment.affected_repositories,
            "assessment complete"
        );

        task.assessment = Some(assessment.clone());
        Ok(assessment)
    }

    pub fn passes_confidence_gate(&self, confidence: f64, scope: TaskScope) -> bool {
        passes_gate(
            confidence,
            scope,
            self.config.confidence_threshold,
            self.config.max_scope,
        )
    }
}

/// Both bounds are inclusive.
pub fn passes_gate(confidence: f64, scope: TaskScope, threshold: f64, max_scope: TaskScope) -> bool {
    confidence >= threshold && scope.severity() <= max_scope.severity()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_is_inclusive_on_both_bounds() {
        assert!(passes_gate(70.0, TaskScope::Medium, 70.0, TaskScope::Medium));
        assert!(!passes_gate(69.9, TaskScope::Medium, 70.0, TaskScope::Medium));
        assert!(!passes_gate(100.0, TaskScope::Large, 70.0, TaskScope::Medium));
        assert!(passes_gate(0.0, TaskScope::Trivial, 0.0, TaskScope::Trivial));
        assert!(passes_gate(100.0, TaskScope::Architectural, 100.0, TaskScope::Architectural));
    }
}
