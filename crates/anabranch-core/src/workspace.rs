use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    git::Git,
    source_control::SourceControl,
    types::{branch_name, task_slug, Repository},
};

const WORKTREE_ADD_TIMEOUT: Duration = Duration::from_secs(60);
const WORKTREE_REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-task checkouts of managed repositories.
#[async_trait]
pub trait Workspaces: Send + Sync {
    /// Creates a fresh worktree for `(repository, task_id)` on the task branch
    /// and returns its absolute path.
    async fn prepare_workspace(&self, repository: &Repository, task_id: &str) -> Result<PathBuf>;

    async fn has_uncommitted_changes(&self, path: &Path) -> Result<bool>;

    /// True when HEAD carries commits that `base` does not.
    async fn has_branch_diverged(&self, path: &Path, base: &str) -> Result<bool>;

    /// Commits everything in the worktree. Returns false if it was clean.
    async fn commit_changes(&self, path: &Path, message: &str) -> Result<bool>;

    async fn cleanup_workspace(&self, path: &Path) -> Result<()>;
}

/// Keeps one mirror clone per repository under `<root>/repositories` and
/// hands out worktrees under `<root>/worktrees`. The only component that
/// touches git or filesystem state directly.
pub struct WorkspaceManager {
    root: PathBuf,
    source_control: Arc<dyn SourceControl>,
    git: Git,
    author_name: String,
    author_email: String,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>, source_control: Arc<dyn SourceControl>) -> Self {
        let root: PathBuf = root.into();
        // Workspace paths are handed to agent subprocesses; keep them absolute.
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        Self {
            root,
            source_control,
            git: Git::new(),
            author_name: "Anabranch".into(),
            author_email: "anabranch-bot@users.noreply.github.com".into(),
        }
    }

    pub fn with_git(mut self, git: Git) -> Self {
        self.git = git;
        self
    }

    pub fn with_author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = name.into();
        self.author_email = email.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repositories_dir(&self) -> PathBuf {
        self.root.join("repositories")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.root.join("worktrees")
    }

    pub fn repository_path(&self, repository: &Repository) -> PathBuf {
        let mut path = self.repositories_dir();
        for part in repository.full_name.split('/') {
            path.push(part);
        }
        path
    }

    pub fn workspace_path(&self, repository: &Repository, task_id: &str) -> PathBuf {
        let repo = repository.full_name.replace('/', "--");
        self.worktrees_dir()
            .join(format!("{repo}--{}", task_slug(task_id)))
    }

    /// Clones every repository the provider knows that is not yet mirrored
    /// and fast-forwards the rest.
    pub async fn initialize(&self) -> Result<()> {
        for dir in [self.repositories_dir(), self.worktrees_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let repositories = self.source_control.list_repositories().await?;
        info!(
            count = repositories.len(),
            root = %self.root.display(),
            "syncing repositories to local workspace"
        );

        for repository in &repositories {
            self.ensure_cloned(repository).await?;
        }

        info!("workspace initialization complete");
        Ok(())
    }

    async fn ensure_cloned(&self, repository: &Repository) -> Result<()> {
        let path = self.repository_path(repository);
        if path.exists() {
            debug!(repository = %repository.full_name, "already cloned, pulling latest");
            self.pull_latest_safely(&path).await;
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        self.source_control
            .clone_repository(repository, &path)
            .await
            .with_context(|| format!("failed to clone {}", repository.full_name))?;
        info!(repository = %repository.full_name, "cloned");
        Ok(())
    }

    async fn pull_latest_safely(&self, path: &Path) {
        if let Err(e) = self.source_control.pull_latest(path).await {
            warn!(
                path = %path.display(),
                "failed to pull latest, continuing with existing state: {e:#}"
            );
        }
    }

    /// Forcibly clears a leftover worktree directory that `git worktree
    /// remove` could not handle (e.g. its metadata is already gone).
    async fn discard_stale_workspace(&self, mirror: &Path, path: &Path) -> Result<()> {
        if let Err(e) = self.cleanup_workspace(path).await {
            warn!(path = %path.display(), "stale worktree removal failed, deleting directory: {e:#}");
            if path.exists() {
                tokio::fs::remove_dir_all(path)
                    .await
                    .with_context(|| format!("failed to delete {}", path.display()))?;
            }
        }
        self.git.worktree_prune(mirror).await
    }
}

#[async_trait]
impl Workspaces for WorkspaceManager {
    async fn prepare_workspace(&self, repository: &Repository, task_id: &str) -> Result<PathBuf> {
        let mirror = self.repository_path(repository);
        self.pull_latest_safely(&mirror).await;

        let branch = branch_name(task_id);
        let path = self.workspace_path(repository, task_id);

        if path.exists() {
            warn!(
                repository = %repository.full_name,
                path = %path.display(),
                "worktree already exists, removing before re-creating"
            );
            self.discard_stale_workspace(&mirror, &path).await?;
        }

        self.git
            .worktree_add(
                &mirror,
                &path,
                &branch,
                &repository.default_branch,
                WORKTREE_ADD_TIMEOUT,
            )
            .await?;

        info!(repository = %repository.full_name, branch = %branch, "worktree created");
        Ok(path)
    }

    async fn has_uncommitted_changes(&self, path: &Path) -> Result<bool> {
        Ok(!self.git.status_porcelain(path).await?.trim().is_empty())
    }

    async fn has_branch_diverged(&self, path: &Path, base: &str) -> Result<bool> {
        Ok(!self.git.commits_since(path, base).await?.is_empty())
    }

    async fn commit_changes(&self, path: &Path, message: &str) -> Result<bool> {
        self.git
            .commit_all(path, message, (&self.author_name, &self.author_email))
            .await
    }

    async fn cleanup_workspace(&self, path: &Path) -> Result<()> {
        let mirror = self
            .git
            .owning_repository(path)
            .await
            .with_context(|| format!("failed to resolve owning repository of {}", path.display()))?;
        self.git
            .worktree_remove(&mirror, path, WORKTREE_REMOVE_TIMEOUT)
            .await?;
        debug!(path = %path.display(), "worktree removed");
        Ok(())
    }
}
