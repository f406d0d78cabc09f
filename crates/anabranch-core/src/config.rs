use std::{collections::HashMap, fmt, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Result};

use crate::{ticketing::TicketFilter, types::TaskScope};

// ── Enumerated settings ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentProvider {
    ClaudeCode,
    Cursor,
}

impl AgentProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Cursor => "cursor",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::ClaudeCode => "ANTHROPIC_API_KEY",
            Self::Cursor => "CURSOR_API_KEY",
        }
    }
}

impl fmt::Display for AgentProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "claude-code" | "claude" => Ok(Self::ClaudeCode),
            "cursor" => Ok(Self::Cursor),
            other => Err(anyhow!("unknown agent provider {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorKind {
    Default,
}

impl FromStr for OrchestratorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "default" | "" => Ok(Self::Default),
            other => Err(anyhow!("unknown orchestrator {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "pretty" | "text" | "" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(anyhow!("unknown log format {other:?}")),
        }
    }
}

// ── Sections ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AssessmentConfig {
    /// Go straight to execution against every repository.
    pub skip: bool,
    pub confidence_threshold: f64,
    pub max_scope: TaskScope,
    pub timeout_minutes: u64,
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub max_file_changes: u32,
    /// Upper bound for one agent run.
    pub timeout_minutes: u64,
    /// Extra whole-operation attempts after the first.
    pub retries: u32,
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: String,
    pub app_id: String,
    pub private_key_path: String,
    pub installation_id: String,
    /// Used when the API does not report a default branch.
    pub base_branch: String,
    pub api_url: String,
}

impl GitHubConfig {
    pub fn uses_app_auth(&self) -> bool {
        !self.app_id.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub enabled: bool,
    /// Empty disables signature verification.
    pub webhook_secret: String,
    pub filter: TicketFilter,
}

/// Full application configuration, read from the environment with a `.env`
/// fallback.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    // Agent
    pub agent_provider: AgentProvider,
    pub agent_api_key: String,
    pub agent_model: Option<String>,
    /// CLI binary override; empty uses the provider's default.
    pub agent_bin: String,
    /// Spend cap per execution run in USD; 0 disables it.
    pub agent_max_budget_usd: f64,
    pub assessment: AssessmentConfig,
    pub execution: ExecutionConfig,
    pub orchestrator: OrchestratorKind,

    // Collaborators
    pub jira: JiraConfig,
    pub github: GitHubConfig,

    // Workspace
    pub workspace_path: PathBuf,
    pub git_timeout_s: u64,
    pub bot_name: String,
    pub bot_email: String,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok().or_else(|| dotenv.get(key).cloned()))
    }

    /// Builds a config from an arbitrary key lookup. Unset or empty keys use
    /// their defaults; malformed enumerations are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env(&lookup);

        let agent_provider: AgentProvider = env.str("AGENT_PROVIDER", "claude-code").parse()?;
        let agent_api_key = env.str(agent_provider.api_key_var(), "");
        let agent_model = env.get("AGENT_MODEL");

        Ok(Self {
            host: env.str("HOST", "0.0.0.0"),
            port: env.parsed("PORT", 3000),
            agent_provider,
            agent_api_key,
            agent_model,
            agent_bin: env.str("AGENT_BIN", ""),
            agent_max_budget_usd: env.parsed("AGENT_MAX_BUDGET_USD", 5.0),
            assessment: AssessmentConfig {
                skip: env.bool("SKIP_ASSESSMENT", false),
                confidence_threshold: env.parsed("CONFIDENCE_THRESHOLD", 70.0),
                max_scope: env.str("MAX_SCOPE", "medium").parse()?,
                timeout_minutes: env.parsed("ASSESSMENT_TIMEOUT_MINUTES", 10),
            },
            execution: ExecutionConfig {
                max_file_changes: env.parsed("EXECUTION_MAX_FILE_CHANGES", 20),
                timeout_minutes: env.parsed("EXECUTION_TIMEOUT_MINUTES", 30),
                retries: env.parsed("EXECUTION_RETRIES", 2),
            },
            orchestrator: env.str("ORCHESTRATOR", "default").parse()?,
            jira: JiraConfig {
                enabled: env.bool("JIRA_ENABLED", true),
                webhook_secret: env.str("JIRA_WEBHOOK_SECRET", ""),
                filter: TicketFilter {
                    projects: env.list("JIRA_FILTER_PROJECTS"),
                    labels: env.list("JIRA_FILTER_LABELS"),
                    exclude_labels: env.list("JIRA_FILTER_EXCLUDE_LABELS"),
                    issue_types: env.list("JIRA_FILTER_ISSUE_TYPES"),
                    assignees: env.list("JIRA_FILTER_ASSIGNEES"),
                },
            },
            github: GitHubConfig {
                token: env.str("GITHUB_TOKEN", ""),
                app_id: env.str("GITHUB_APP_ID", ""),
                private_key_path: env.str("GITHUB_PRIVATE_KEY_PATH", ""),
                installation_id: env.str("GITHUB_INSTALLATION_ID", ""),
                base_branch: env.str("GITHUB_BASE_BRANCH", "main"),
                api_url: env
                    .str("GITHUB_API_URL", "https://api.github.com")
                    .trim_end_matches('/')
                    .to_string(),
            },
            workspace_path: PathBuf::from(env.str("WORKSPACE_PATH", "./workspace")),
            git_timeout_s: env.parsed("GIT_TIMEOUT_S", 120),
            bot_name: env.str("BOT_NAME", "Anabranch"),
            bot_email: env.str("BOT_EMAIL", "anabranch-bot@users.noreply.github.com"),
            log_level: env.str("LOG_LEVEL", "info"),
            log_format: env.str("LOG_FORMAT", "pretty").parse()?,
        })
    }

    /// Checks ranges and that the credentials the selected collaborators need
    /// are present.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.assessment.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
            bail!("CONFIDENCE_THRESHOLD must be within 0..=100, got {threshold}");
        }
        let budget = self.agent_max_budget_usd;
        if !budget.is_finite() || budget < 0.0 {
            bail!("AGENT_MAX_BUDGET_USD must be zero or a positive amount, got {budget}");
        }
        if self.execution.timeout_minutes == 0 {
            bail!("EXECUTION_TIMEOUT_MINUTES must be greater than zero");
        }
        if self.assessment.timeout_minutes == 0 {
            bail!("ASSESSMENT_TIMEOUT_MINUTES must be greater than zero");
        }
        if self.agent_api_key.is_empty() {
            bail!(
                "agent provider is {} but {} is not set",
                self.agent_provider,
                self.agent_provider.api_key_var()
            );
        }
        let gh = &self.github;
        if gh.uses_app_auth() {
            if gh.private_key_path.is_empty() || gh.installation_id.is_empty() {
                bail!("GITHUB_APP_ID requires GITHUB_PRIVATE_KEY_PATH and GITHUB_INSTALLATION_ID");
            }
        } else if gh.token.is_empty() {
            bail!("set GITHUB_TOKEN or GITHUB_APP_ID for source control access");
        }
        if self.bot_name.trim().is_empty() {
            bail!("BOT_NAME must not be empty");
        }
        Ok(())
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_s)
    }
}

// ── Lookup helpers ───────────────────────────────────────────────────────

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().trim_matches('"');
            map.insert(k.trim().to_string(), v.to_string());
        }
    }
    map
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).as_deref().map(str::trim) {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            _ => default,
        }
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
