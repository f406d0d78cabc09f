use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Tickets ──────────────────────────────────────────────────────────────

/// A unit of requested work as delivered by a ticketing system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    /// Human-facing key in the originating system, e.g. `ENG-42`.
    pub external_id: String,
    pub title: String,
    pub description: String,
    pub labels: Vec<String>,
    pub assignee: Option<String>,
    pub priority: Option<String>,
    pub issue_type: Option<String>,
    pub project: Option<String>,
    pub url: Option<String>,
    /// Name of the ticket source, e.g. "jira".
    pub provider: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

// ── Assessment ───────────────────────────────────────────────────────────

/// Size tier of a change. Variant order is severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskScope {
    Trivial,
    Small,
    Medium,
    Large,
    Architectural,
}

impl TaskScope {
    pub const ALL: [TaskScope; 5] = [
        TaskScope::Trivial,
        TaskScope::Small,
        TaskScope::Medium,
        TaskScope::Large,
        TaskScope::Architectural,
    ];

    pub fn severity(self) -> u8 {
        match self {
            Self::Trivial => 0,
            Self::Small => 1,
            Self::Medium => 2,
            Self::Large => 3,
            Self::Architectural => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::Architectural => "architectural",
        }
    }
}

impl fmt::Display for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|scope| scope.as_str() == s)
            .ok_or_else(|| anyhow!("unknown scope {s:?}"))
    }
}

/// The agent's evaluation of a ticket. Produced once per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResult {
    /// 0..=100
    pub confidence: f64,
    pub scope: TaskScope,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub decisions_required: Vec<String>,
    #[serde(default)]
    pub estimated_files: u32,
    /// Full names (`owner/name`) of the repositories the work touches.
    #[serde(default)]
    pub affected_repositories: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
}

impl AssessmentResult {
    pub fn validate(&self) -> Result<()> {
        if !self.confidence.is_finite() || !(0.0..=100.0).contains(&self.confidence) {
            bail!(
                "assessment confidence {} is outside 0..=100",
                self.confidence
            );
        }
        Ok(())
    }
}

// ── Agent output ─────────────────────────────────────────────────────────

/// Outcome of one agent execution run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    /// The agent ran to completion. `false` is a failure.
    pub completed: bool,
    /// The agent wants its changes turned into pull requests.
    /// `completed && !create_pull_request` is a decline, not a failure.
    pub create_pull_request: bool,
    pub skip_reason: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    pub tests_passed: Option<bool>,
    pub cost_in_dollars: Option<f64>,
}

impl AgentResult {
    pub fn declined(&self) -> bool {
        self.completed && !self.create_pull_request
    }
}

/// Knobs passed through to the agent for an execution run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub model: Option<String>,
    pub max_file_changes: u32,
    pub timeout_minutes: u64,
}

// ── Source control ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub name: String,
    /// `owner/name`; the stable key for a repository.
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    pub description: Option<String>,
    pub private: bool,
}

impl Repository {
    pub fn owner_and_name(&self) -> Result<(&str, &str)> {
        match self.full_name.split_once('/') {
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() => Ok((owner, name)),
            _ => bail!("repository full name {:?} is not owner/name", self.full_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub head_branch: String,
    pub base_branch: String,
}

/// Request to open a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePullRequest {
    pub owner: String,
    pub repo: String,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

// ── Task lifecycle ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Assessing,
    Executing,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Allowed edges of the lifecycle. Terminal states have no exits.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Queued, Assessing | Executing) => true,
            (Assessing, Executing | Skipped) => true,
            (Executing, Succeeded | Skipped) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Assessing => "assessing",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ticket moving through the pipeline. Owned by exactly one stage at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub ticket: Ticket,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub assessment: Option<AssessmentResult>,
    pub result: Option<AgentResult>,
    pub pull_requests: Vec<PullRequest>,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, ticket: Ticket) -> Self {
        Self {
            id: id.into(),
            ticket,
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            assessment: None,
            result: None,
            pull_requests: Vec::new(),
            error_message: None,
            skip_reason: None,
        }
    }

    pub fn branch(&self) -> String {
        branch_name(&self.id)
    }

    pub fn advance(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            bail!(
                "task {} cannot move from {} to {}",
                self.id,
                self.status,
                next
            );
        }
        self.status = next;
        Ok(())
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> Result<()> {
        self.advance(TaskStatus::Skipped)?;
        self.skip_reason = Some(reason.into());
        Ok(())
    }

    /// Marks the task failed. No-op once terminal.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = TaskStatus::Failed;
        self.error_message = Some(message.into());
    }
}

/// Branch every workspace for `task_id` is checked out on.
pub fn branch_name(task_id: &str) -> String {
    format!("anabranch/{}", task_slug(task_id))
}

/// Encodes a task id for use as a path segment and ref component.
///
/// ASCII alphanumerics and `-` pass through; every other byte becomes
/// `_xx`. `_` only ever opens an escape, so distinct ids never share a slug.
pub fn task_slug(task_id: &str) -> String {
    let mut out = String::with_capacity(task_id.len());
    for b in task_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("_{b:02x}"));
        }
    }
    out
}
