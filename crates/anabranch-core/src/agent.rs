use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AgentConfig, AgentResult, AssessmentResult, Repository, Ticket};

/// An autonomous coding agent driven through a prompt.
#[async_trait]
pub trait CodingAgent: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the agent's tooling is installed and usable.
    async fn is_available(&self) -> bool;

    /// Read-only evaluation of a ticket against the known repositories.
    async fn assess(&self, ticket: &Ticket, repositories: &[Repository])
        -> Result<AssessmentResult>;

    /// Works the ticket inside the prepared workspaces.
    async fn execute(
        &self,
        ticket: &Ticket,
        workspaces: &[PathBuf],
        assessment: Option<&AssessmentResult>,
        config: &AgentConfig,
    ) -> Result<AgentResult>;
}
