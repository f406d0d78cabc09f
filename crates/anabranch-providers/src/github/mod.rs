pub mod auth;

use std::{path::Path, time::Duration};

use anabranch_core::{
    config::GitHubConfig,
    git::Git,
    source_control::SourceControl,
    types::{CreatePullRequest, PullRequest, Repository},
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::EncodingKey;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use auth::{git_auth_header, Credentials, TokenSource};

const PAGE_SIZE: usize = 100;
const CLONE_TIMEOUT: Duration = Duration::from_secs(300);
const REMOTE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    full_name: String,
    clone_url: String,
    default_branch: Option<String>,
    description: Option<String>,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct InstallationRepositories {
    #[serde(default)]
    repositories: Vec<ApiRepository>,
}

#[derive(Debug, Deserialize)]
struct ApiPullRequest {
    number: u64,
    html_url: String,
    title: String,
}

#[derive(Serialize)]
struct NewPullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

/// GitHub over REST, with git operations run through the CLI using a
/// per-command auth header.
pub struct GitHubProvider {
    http: reqwest::Client,
    api_url: String,
    tokens: TokenSource,
    base_branch: String,
    git: Git,
}

impl GitHubProvider {
    pub fn new(credentials: Credentials, api_url: impl Into<String>, base_branch: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent(concat!("anabranch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            tokens: TokenSource::new(credentials, http.clone(), api_url.clone()),
            http,
            api_url,
            base_branch: base_branch.into(),
            git: Git::new().with_timeout(REMOTE_TIMEOUT),
        }
    }

    /// Builds the provider from configuration, preferring App credentials
    /// when an App id is set.
    pub fn from_config(config: &GitHubConfig) -> Result<Self> {
        let credentials = if config.uses_app_auth() {
            let pem = std::fs::read(&config.private_key_path).with_context(|| {
                format!("failed to read GitHub App key {}", config.private_key_path)
            })?;
            Credentials::App {
                app_id: config.app_id.clone(),
                key: EncodingKey::from_rsa_pem(&pem).context("invalid GitHub App private key")?,
                installation_id: config.installation_id.clone(),
            }
        } else if !config.token.is_empty() {
            Credentials::Token(config.token.clone())
        } else {
            bail!("GitHub needs GITHUB_TOKEN or GitHub App credentials");
        };
        Ok(Self::new(credentials, &config.api_url, &config.base_branch))
    }

    pub fn with_git(mut self, git: Git) -> Self {
        self.git = git;
        self
    }

    async fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let token = self.tokens.token().await?;
        Ok(self
            .http
            .request(method, format!("{}{path}", self.api_url))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28"))
    }

    async fn authed_git(&self) -> Result<Git> {
        let token = self.tokens.token().await?;
        Ok(self.git.clone().with_config("http.extraHeader", git_auth_header(&token)))
    }

    async fn list_page(&self, page: usize) -> Result<Vec<ApiRepository>> {
        let path = if self.tokens.is_app() {
            format!("/installation/repositories?per_page={PAGE_SIZE}&page={page}")
        } else {
            format!("/user/repos?per_page={PAGE_SIZE}&page={page}&affiliation=owner,collaborator,organization_member")
        };
        let resp = self
            .request(reqwest::Method::GET, &path)
            .await?
            .send()
            .await
            .context("failed to list repositories")?
            .error_for_status()?;
        if self.tokens.is_app() {
            Ok(resp.json::<InstallationRepositories>().await?.repositories)
        } else {
            Ok(resp.json::<Vec<ApiRepository>>().await?)
        }
    }

    async fn find_open_pull_request(&self, owner: &str, repo: &str, head: &str) -> Result<Option<PullRequest>> {
        let path = format!(
            "/repos/{owner}/{repo}/pulls?state=open&head={}",
            urlencoding::encode(&format!("{owner}:{head}"))
        );
        let pulls: Vec<ApiPullRequest> = self
            .request(reqwest::Method::GET, &path)
            .await?
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(pulls.into_iter().next().map(|p| PullRequest {
            number: p.number,
            url: p.html_url,
            title: p.title,
            head_branch: head.to_string(),
            base_branch: String::new(),
        }))
    }
}

#[async_trait]
impl SourceControl for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut repositories = Vec::new();
        for page in 1.. {
            let batch = self.list_page(page).await?;
            let len = batch.len();
            repositories.extend(batch.into_iter().map(|r| Repository {
                name: r.name,
                full_name: r.full_name,
                clone_url: r.clone_url,
                default_branch: r
                    .default_branch
                    .filter(|b| !b.is_empty())
                    .unwrap_or_else(|| self.base_branch.clone()),
                description: r.description,
                private: r.private,
            }));
            if len < PAGE_SIZE {
                break;
            }
        }
        info!(count = repositories.len(), "discovered GitHub repositories");
        Ok(repositories)
    }

    async fn clone_repository(&self, repository: &Repository, dest: &Path) -> Result<()> {
        self.authed_git()
            .await?
            .clone_into(&repository.clone_url, dest, CLONE_TIMEOUT)
            .await
            .with_context(|| format!("failed to clone {}", repository.full_name))?;
        info!(repo = %repository.full_name, path = %dest.display(), "repository cloned");
        Ok(())
    }

    async fn pull_latest(&self, path: &Path) -> Result<()> {
        let git = self.authed_git().await?;
        git.fetch_prune(path).await?;
        git.pull_ff_only(path).await?;
        debug!(path = %path.display(), "pulled latest changes");
        Ok(())
    }

    async fn push_branch(&self, path: &Path, branch: &str) -> Result<()> {
        self.authed_git()
            .await?
            .push_force_with_lease(path, branch)
            .await?;
        info!(path = %path.display(), branch, "branch pushed");
        Ok(())
    }

    async fn create_pull_request(&self, request: CreatePullRequest) -> Result<PullRequest> {
        let path = format!("/repos/{}/{}/pulls", request.owner, request.repo);
        let resp = self
            .request(reqwest::Method::POST, &path)
            .await?
            .json(&NewPullRequest {
                title: &request.title,
                body: &request.body,
                head: &request.head,
                base: &request.base,
            })
            .send()
            .await
            .context("failed to create pull request")?;

        let status = resp.status();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = resp.text().await.unwrap_or_default();
            warn!(repo = %request.repo, head = %request.head, "pull request rejected, looking for an existing one");
            let existing = self
                .find_open_pull_request(&request.owner, &request.repo, &request.head)
                .await?
                .ok_or_else(|| anyhow!("GitHub rejected pull request for {}/{}: {body}", request.owner, request.repo))?;
            info!(number = existing.number, url = %existing.url, "reusing open pull request");
            return Ok(PullRequest {
                base_branch: request.base,
                ..existing
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GitHub returned {status} creating pull request for {}/{}: {body}", request.owner, request.repo);
        }

        let created: ApiPullRequest = resp.json().await.context("bad pull request response")?;
        info!(number = created.number, url = %created.html_url, "pull request created");
        Ok(PullRequest {
            number: created.number,
            url: created.html_url,
            title: created.title,
            head_branch: request.head,
            base_branch: request.base,
        })
    }
}
