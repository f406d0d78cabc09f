use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Thin async wrapper over the `git` CLI. Every invocation is bounded by a
/// timeout and the child is killed if the future is dropped.
#[derive(Debug, Clone)]
pub struct Git {
    timeout: Duration,
    /// Config entries passed to every invocation through `GIT_CONFIG_*`, so
    /// values never appear in the process argument list.
    config: Vec<(String, String)>,
}

impl Default for Git {
    fn default() -> Self {
        Self::new()
    }
}

impl Git {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_GIT_TIMEOUT,
            config: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.push((key.into(), value.into()));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn exec(&self, dir: &Path, args: &[&str]) -> Result<ExecResult> {
        self.exec_timeout(dir, args, self.timeout).await
    }

    pub async fn exec_timeout(
        &self,
        dir: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ExecResult> {
        let mut cmd = Command::new("git");
        if !self.config.is_empty() {
            cmd.env("GIT_CONFIG_COUNT", self.config.len().to_string());
            for (i, (k, v)) in self.config.iter().enumerate() {
                cmd.env(format!("GIT_CONFIG_KEY_{i}"), k)
                    .env(format!("GIT_CONFIG_VALUE_{i}"), v);
            }
        }
        cmd.arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(dir = %dir.display(), "git {}", args.join(" "));

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                anyhow!(
                    "git {} timed out after {}s in {}",
                    args.join(" "),
                    timeout.as_secs(),
                    dir.display()
                )
            })?
            .with_context(|| format!("failed to spawn git -C {} {}", dir.display(), args.join(" ")))?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }

    /// Runs git and returns stdout, failing on a non-zero exit.
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        self.run_timeout(dir, args, self.timeout).await
    }

    pub async fn run_timeout(&self, dir: &Path, args: &[&str], timeout: Duration) -> Result<String> {
        let result = self.exec_timeout(dir, args, timeout).await?;
        if !result.success() {
            bail!(
                "git {} failed in {}: {}",
                args.join(" "),
                dir.display(),
                result.combined_output().trim()
            );
        }
        Ok(result.stdout)
    }

    // ── Remote ───────────────────────────────────────────────────────────

    pub async fn clone_into(&self, url: &str, dest: &Path, timeout: Duration) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("clone destination {} has no parent", dest.display()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let dest_str = dest.to_string_lossy();
        self.run_timeout(parent, &["clone", url, &dest_str], timeout)
            .await?;
        Ok(())
    }

    pub async fn fetch_prune(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["fetch", "--all", "--prune"]).await?;
        Ok(())
    }

    pub async fn pull_ff_only(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["pull", "--ff-only"]).await?;
        Ok(())
    }

    pub async fn push_force_with_lease(&self, dir: &Path, branch: &str) -> Result<()> {
        self.run(dir, &["push", "origin", branch, "--force-with-lease"])
            .await?;
        Ok(())
    }

    // ── Worktrees ────────────────────────────────────────────────────────

    /// Creates a worktree at `path` on `branch`, resetting the branch to
    /// `base` if it already exists.
    pub async fn worktree_add(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        base: &str,
        timeout: Duration,
    ) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run_timeout(
            repo,
            &["worktree", "add", "-B", branch, &path_str, base],
            timeout,
        )
        .await
        .with_context(|| format!("git worktree add failed for branch={branch} base={base}"))?;
        Ok(())
    }

    pub async fn worktree_remove(&self, repo: &Path, path: &Path, timeout: Duration) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run_timeout(repo, &["worktree", "remove", "--force", &path_str], timeout)
            .await?;
        Ok(())
    }

    pub async fn worktree_prune(&self, repo: &Path) -> Result<()> {
        self.run(repo, &["worktree", "prune"]).await?;
        Ok(())
    }

    /// The repository that owns the worktree at `dir` (the mirror's working
    /// directory, not its `.git`).
    pub async fn owning_repository(&self, dir: &Path) -> Result<PathBuf> {
        let out = self.run(dir, &["rev-parse", "--git-common-dir"]).await?;
        let common = PathBuf::from(out.trim());
        let common = if common.is_absolute() {
            common
        } else {
            dir.join(common)
        };
        let common = std::fs::canonicalize(&common).unwrap_or(common);
        if common.file_name().is_some_and(|n| n == ".git") {
            if let Some(parent) = common.parent() {
                return Ok(parent.to_path_buf());
            }
        }
        Ok(common)
    }

    // ── Changes ──────────────────────────────────────────────────────────

    pub async fn status_porcelain(&self, dir: &Path) -> Result<String> {
        self.run(dir, &["status", "--porcelain"]).await
    }

    /// One line per commit reachable from HEAD but not from `base`.
    pub async fn commits_since(&self, dir: &Path, base: &str) -> Result<Vec<String>> {
        let range = format!("{base}..HEAD");
        let out = self.run(dir, &["log", "--oneline", &range]).await?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Stages everything and commits as `author`. Returns false when there
    /// was nothing to commit.
    pub async fn commit_all(&self, dir: &Path, message: &str, author: (&str, &str)) -> Result<bool> {
        self.run(dir, &["add", "-A"]).await?;

        if self.status_porcelain(dir).await?.trim().is_empty() {
            return Ok(false);
        }

        let (name, email) = author;
        let name_cfg = format!("user.name={name}");
        let email_cfg = format!("user.email={email}");
        let author_str = format!("{name} <{email}>");
        self.run(
            dir,
            &[
                "-c",
                &name_cfg,
                "-c",
                &email_cfg,
                "commit",
                "-m",
                message,
                "--author",
                &author_str,
            ],
        )
        .await?;
        Ok(true)
    }
}
