use std::{path::PathBuf, time::Duration};

use anabranch_core::{
    agent::CodingAgent,
    types::{AgentConfig, AgentResult, AssessmentResult, Repository, Ticket},
};
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::{
    parse::{parse_assessment, split_decision},
    process::{probe_version, CliCommand},
    prompt::{build_assessment_prompt, build_execution_prompt},
};

/// JSON printed by `agent -p --output-format json`.
#[derive(Debug, Default, Deserialize)]
struct CursorResponse {
    result: Option<String>,
    error: Option<String>,
    is_error: Option<bool>,
}

/// Runs the Cursor CLI (`agent`) in print mode.
pub struct CursorAgent {
    pub cursor_bin: String,
    pub api_key: String,
    pub model: Option<String>,
    pub assessment_timeout: Duration,
}

impl CursorAgent {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            cursor_bin: "agent".into(),
            api_key: api_key.into(),
            model: None,
            assessment_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
        self.cursor_bin = bin.into();
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

    async fn run(
        &self,
        mut args: Vec<String>,
        cwd: &std::path::Path,
        timeout: Duration,
    ) -> Result<(String, Option<String>)> {
        if let Some(model) = &self.model {
            args.insert(0, model.clone());
            args.insert(0, "--model".into());
        }
        let output = CliCommand {
            bin: &self.cursor_bin,
            args,
            cwd,
            env: vec![("CURSOR_API_KEY", self.api_key.clone())],
            timeout,
            label: "cursor",
        }
        .run()
        .await?;

        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            bail!("cursor exited with {:?}: {detail}", output.exit_code);
        }
        Ok(interpret_response(&output.stdout))
    }
}

/// Splits the CLI's JSON envelope into result text and an error, falling
/// back to the raw output when it is not JSON.
fn interpret_response(stdout: &str) -> (String, Option<String>) {
    match serde_json::from_str::<CursorResponse>(stdout.trim()) {
        Ok(r) => {
            let error = r
                .error
                .or_else(|| r.is_error.unwrap_or(false).then(|| "agent reported an error".into()));
            (r.result.unwrap_or_default(), error)
        }
        Err(_) => (stdout.to_string(), None),
    }
}

#[async_trait]
impl CodingAgent for CursorAgent {
    fn name(&self) -> &str {
        "cursor"
    }

    async fn is_available(&self) -> bool {
        probe_version(&self.cursor_bin).await
    }

    async fn assess(&self, ticket: &Ticket, repositories: &[Repository]) -> Result<AssessmentResult> {
        info!(ticket = %ticket.external_id, "running assessment with Cursor CLI");

        let args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            build_assessment_prompt(ticket, repositories),
        ];
        let cwd = std::env::current_dir()?;
        let (text, error) = self.run(args, &cwd, self.assessment_timeout).await?;
        if let Some(error) = error {
            bail!("Cursor assessment failed: {error}");
        }
        let assessment = parse_assessment(&text)?;

        info!(
            ticket = %ticket.external_id,
            confidence = assessment.confidence,
            scope = %assessment.scope,
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
        let Some(primary) = workspaces.first() else {
            bail!("no workspaces to execute in");
        };
        info!(ticket = %ticket.external_id, workspaces = workspaces.len(), "running execution with Cursor CLI");

        let args = vec![
            "-p".to_string(),
            "--force".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            build_execution_prompt(ticket, assessment, workspaces, config.max_file_changes),
        ];
        let timeout = Duration::from_secs(config.timeout_minutes.saturating_mul(60));
        let (text, error) = self.run(args, primary, timeout).await?;

        let result = match error {
            Some(error) => AgentResult {
                completed: false,
                summary: error,
                ..Default::default()
            },
            None => {
                let (summary, decision) = split_decision(&text);
                AgentResult {
                    completed: true,
                    create_pull_request: decision.as_ref().map_or(true, |d| d.should_create_pr),
                    skip_reason: decision.and_then(|d| d.skip_reason),
                    summary,
                    ..Default::default()
                }
            }
        };

        info!(
            ticket = %ticket.external_id,
            completed = result.completed,
            create_pull_request = result.create_pull_request,
            "execution complete"
        );
        Ok(result)
    }
}
