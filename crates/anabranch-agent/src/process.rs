use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{anyhow, Context, Result};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::{debug, warn};

/// Captured result of a finished CLI run.
#[derive(Debug, Clone)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A one-shot invocation of an agent CLI.
pub struct CliCommand<'a> {
    pub bin: &'a str,
    pub args: Vec<String>,
    pub cwd: &'a Path,
    pub env: Vec<(&'static str, String)>,
    pub timeout: Duration,
    /// Tag used in logs, e.g. "claude".
    pub label: &'a str,
}

impl CliCommand<'_> {
    /// Spawns the process and collects its output. The child is killed when
    /// the timeout elapses.
    pub async fn run(self) -> Result<CliOutput> {
        let mut cmd = Command::new(self.bin);
        cmd.args(&self.args)
            .current_dir(self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.env {
            if !v.is_empty() {
                cmd.env(k, v);
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn {}: {}", self.label, self.bin))?;
        let stdout = child.stdout.take().context("failed to take stdout")?;
        let stderr = child.stderr.take().context("failed to take stderr")?;
        let label = self.label;

        let io_future = async move {
            let mut out = String::new();
            let mut err = String::new();
            let mut stdout_reader = BufReader::new(stdout).lines();
            let mut stderr_reader = BufReader::new(stderr).lines();
            let mut stderr_open = true;

            loop {
                tokio::select! {
                    line = stdout_reader.next_line() => {
                        match line.context("error reading stdout")? {
                            Some(l) => {
                                debug!(agent = label, "{}", l);
                                out.push_str(&l);
                                out.push('\n');
                            }
                            None => break,
                        }
                    }
                    line = stderr_reader.next_line(), if stderr_open => {
                        match line {
                            Ok(Some(l)) if !l.is_empty() => {
                                warn!(agent = label, "stderr: {}", l);
                                err.push_str(&l);
                                err.push('\n');
                            }
                            Ok(Some(_)) => {}
                            _ => stderr_open = false,
                        }
                    }
                }
            }

            while stderr_open {
                let Ok(Some(l)) = stderr_reader.next_line().await else {
                    break;
                };
                if !l.is_empty() {
                    warn!(agent = label, "stderr: {}", l);
                    err.push_str(&l);
                    err.push('\n');
                }
            }

            let status = child
                .wait()
                .await
                .with_context(|| format!("failed to wait for {label}"))?;
            anyhow::Ok(CliOutput {
                stdout: out,
                stderr: err,
                exit_code: status.code(),
            })
        };

        tokio::time::timeout(self.timeout, io_future)
            .await
            .map_err(|_| anyhow!("{} timed out after {}s", self.label, self.timeout.as_secs()))?
    }
}

/// Whether `bin --version` runs successfully.
pub async fn probe_version(bin: &str) -> bool {
    Command::new(bin)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn collects_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = CliCommand {
            bin: "sh",
            args: vec!["-c".into(), "echo one; echo two; echo oops >&2; exit 3".into()],
            cwd: dir.path(),
            env: vec![],
            timeout: Duration::from_secs(10),
            label: "sh",
        }
        .run()
        .await
        .unwrap();
        assert_eq!(out.stdout, "one\ntwo\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
        assert!(logs_contain("stderr: oops"));
    }

    #[tokio::test]
    async fn times_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = CliCommand {
            bin: "sleep",
            args: vec!["5".into()],
            cwd: dir.path(),
            env: vec![],
            timeout: Duration::from_millis(100),
            label: "sleep",
        }
        .run()
        .await
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        assert!(!probe_version("definitely-not-a-real-binary-4242").await);
    }
}
