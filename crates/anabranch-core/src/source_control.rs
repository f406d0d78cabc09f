use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{CreatePullRequest, PullRequest, Repository};

/// A git hosting provider.
#[async_trait]
pub trait SourceControl: Send + Sync {
    fn name(&self) -> &str;

    async fn list_repositories(&self) -> Result<Vec<Repository>>;

    /// Clones `repository` into `dest`, which must not exist yet.
    async fn clone_repository(&self, repository: &Repository, dest: &Path) -> Result<()>;

    /// Fast-forwards the checkout at `path` to its upstream.
    async fn pull_latest(&self, path: &Path) -> Result<()>;

    /// Pushes `branch` from the checkout at `path` with force-with-lease.
    async fn push_branch(&self, path: &Path, branch: &str) -> Result<()>;

    async fn create_pull_request(&self, request: CreatePullRequest) -> Result<PullRequest>;
}
