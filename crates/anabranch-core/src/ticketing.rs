use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Ticket;

/// What became of one inbound webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum WebhookOutcome {
    /// A task was queued.
    Accepted { task_id: String },
    /// Valid delivery that does not produce work.
    Ignored { reason: String },
    /// Signature did not verify.
    Rejected,
}

/// A system that delivers tickets, typically by webhook.
#[async_trait]
pub trait TicketSource: Send + Sync {
    fn name(&self) -> &str;

    /// Verifies and interprets one raw delivery, queueing a task when it
    /// describes new work.
    async fn handle_webhook(&self, signature: Option<&str>, body: &[u8])
        -> Result<WebhookOutcome>;
}

/// Admission rules for inbound tickets. Empty lists admit everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketFilter {
    pub projects: Vec<String>,
    /// Every listed label must be present.
    pub labels: Vec<String>,
    pub exclude_labels: Vec<String>,
    /// Only checked when the ticket carries an issue type.
    pub issue_types: Vec<String>,
    pub assignees: Vec<String>,
}

impl TicketFilter {
    /// Returns `None` when the ticket passes, otherwise why it was filtered.
    pub fn rejection(&self, ticket: &Ticket) -> Option<String> {
        if !self.projects.is_empty() {
            match &ticket.project {
                Some(p) if self.projects.contains(p) => {}
                _ => return Some(format!("project {:?} not watched", ticket.project)),
            }
        }

        if let Some(missing) = self.labels.iter().find(|l| !ticket.labels.contains(l)) {
            return Some(format!("missing required label {missing}"));
        }

        if let Some(excluded) = ticket
            .labels
            .iter()
            .find(|l| self.exclude_labels.contains(l))
        {
            return Some(format!("excluded label {excluded}"));
        }

        if let Some(kind) = &ticket.issue_type {
            if !self.issue_types.is_empty() && !self.issue_types.contains(kind) {
                return Some(format!("issue type {kind} not watched"));
            }
        }

        if !self.assignees.is_empty() {
            match &ticket.assignee {
                Some(a) if self.assignees.contains(a) => {}
                _ => return Some(format!("assignee {:?} not watched", ticket.assignee)),
            }
        }

        None
    }

    pub fn matches(&self, ticket: &Ticket) -> bool {
        self.rejection(ticket).is_none()
    }
}
