use std::{path::PathBuf, time::Duration};

use anabranch_core::{
    agent::CodingAgent,
    types::{AgentConfig, AgentResult, AssessmentResult, Repository, Ticket},
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::info;

use crate::{
    event::{parse_stream, StreamSummary},
    parse::{parse_assessment, split_decision},
    process::{probe_version, CliCommand},
    prompt::{build_assessment_prompt, build_execution_prompt, ASSESSMENT_SYSTEM_PROMPT},
};

const ASSESSMENT_MAX_TURNS: u32 = 20;
const EXECUTION_MAX_TURNS: u32 = 50;

/// Runs Claude Code (`claude --print`) as a subprocess.
pub struct ClaudeCodeAgent {
    /// Path to the `claude` CLI binary.
    pub claude_bin: String,
    pub api_key: String,
    pub model: Option<String>,
    pub assessment_timeout: Duration,
    /// Passed as `--max-budget-usd` on execution runs.
    pub max_budget_usd: Option<f64>,
}

impl ClaudeCodeAgent {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            claude_bin: "claude".into(),
            api_key: api_key.into(),
            model: None,
            assessment_timeout: Duration::from_secs(600),
            max_budget_usd: None,
        }
    }

    pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
        self.claude_bin = bin.into();
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.is_empty());
        self
    }

    pub fn with_assessment_timeout(mut self, timeout: Duration) -> Self {
        self.assessment_timeout = timeout;
        self
    }

    /// Caps spend per execution run. Non-positive amounts disable the cap.
    pub fn with_max_budget_usd(mut self, budget: Option<f64>) -> Self {
        self.max_budget_usd = budget.filter(|b| b.is_finite() && *b > 0.0);
        self
    }

    fn base_args(&self, max_turns: u32) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--max-turns".to_string(),
            max_turns.to_string(),
        ];
        if let Some(model) = &self.model {
            args.push("--model".into());
            args.push(model.clone());
        }
        args
    }

    async fn run(&self, args: Vec<String>, cwd: &std::path::Path, timeout: Duration) -> Result<StreamSummary> {
        let output = CliCommand {
            bin: &self.claude_bin,
            args,
            cwd,
            env: vec![("ANTHROPIC_API_KEY", self.api_key.clone())],
            timeout,
            label: "claude",
        }
        .run()
        .await?;

        let summary = parse_stream(&output.stdout);
        if !summary.finished && !output.success() {
            bail!(
                "claude exited with {:?} without a result: {}",
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(summary)
    }
}

#[async_trait]
impl CodingAgent for ClaudeCodeAgent {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn is_available(&self) -> bool {
        !self.api_key.is_empty() && probe_version(&self.claude_bin).await
    }

    async fn assess(&self, ticket: &Ticket, repositories: &[Repository]) -> Result<AssessmentResult> {
        info!(ticket = %ticket.external_id, "running assessment with Claude Code");

        let mut args = self.base_args(ASSESSMENT_MAX_TURNS);
        args.extend([
            "--permission-mode".to_string(),
            "plan".to_string(),
            "--allowedTools".to_string(),
            "Read,Glob,Grep".to_string(),
            "--append-system-prompt".to_string(),
            ASSESSMENT_SYSTEM_PROMPT.to_string(),
        ]);
        args.push(build_assessment_prompt(ticket, repositories));

        let cwd = std::env::current_dir()?;
        let summary = self.run(args, &cwd, self.assessment_timeout).await?;
        if summary.is_error {
            bail!(
                "Claude Code assessment failed: {}",
                summary.error.unwrap_or_default()
            );
        }
        let assessment = parse_assessment(&summary.output)?;

        info!(
            ticket = %ticket.external_id,
            confidence = assessment.confidence,
            scope = %assessment.scope,
            cost = ?summary.cost_usd,
            "assessment complete"
        );
        Ok(assessment)
    }

    async fn execute(
        &self,
        ticket: &Ticket,
        workspaces: &[PathBuf],
        assessment: Option<&AssessmentResult>,
        config: &AgentConfig,
    ) -> Result<AgentResult> {
        let Some((primary, extra)) = workspaces.split_first() else {
            bail!("no workspaces to execute in");
        };
        info!(ticket = %ticket.external_id, workspaces = workspaces.len(), "running execution with Claude Code");

        let mut args = self.base_args(EXECUTION_MAX_TURNS);
        if let Some(model) = config.model.as_ref().filter(|_| self.model.is_none()) {
            args.push("--model".into());
            args.push(model.clone());
        }
        args.push("--permission-mode".into());
        args.push("bypassPermissions".into());
        if let Some(budget) = self.max_budget_usd {
            args.push("--max-budget-usd".into());
            args.push(budget.to_string());
        }
        for dir in extra {
            args.push("--add-dir".into());
            args.push(dir.to_string_lossy().into_owned());
        }
        args.push(build_execution_prompt(
            ticket,
            assessment,
            workspaces,
            config.max_file_changes,
        ));

        let timeout = Duration::from_secs(config.timeout_minutes.saturating_mul(60));
        let summary = self.run(args, primary, timeout).await?;
        let result = to_agent_result(summary);

        info!(
            ticket = %ticket.external_id,
            completed = result.completed,
            create_pull_request = result.create_pull_request,
            cost = ?result.cost_in_dollars,
            "execution complete"
        );
        Ok(result)
    }
}

/// Interprets a finished execution stream. A missing decision line is taken
/// as consent; unchanged repositories are filtered out later anyway.
pub fn to_agent_result(summary: StreamSummary) -> AgentResult {
    if summary.is_error || !summary.finished {
        return AgentResult {
            completed: false,
            summary: format!(
                "execution failed: {}",
                summary.error.as_deref().unwrap_or("no result reported")
            ),
            files_changed: summary.files_touched,
            cost_in_dollars: summary.cost_usd,
            ..Default::default()
        };
    }

    let (text, decision) = split_decision(&summary.output);
    let (create_pull_request, skip_reason) = match decision {
        Some(d) => (d.should_create_pr, d.skip_reason),
        None => (true, None),
    };
    AgentResult {
        completed: true,
        create_pull_request,
        skip_reason,
        summary: text,
        files_changed: summary.files_touched,
        tests_passed: None,
        cost_in_dollars: summary.cost_usd,
    }
}
