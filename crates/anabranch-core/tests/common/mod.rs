#![allow(dead_code)]

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anabranch_core::{
    agent::CodingAgent,
    assessment::AssessmentService,
    config::Config,
    execution::ExecutionService,
    orchestrator::TaskOrchestrator,
    pull_request::PullRequestService,
    source_control::SourceControl,
    types::{
        AgentConfig, AgentResult, AssessmentResult, CreatePullRequest, PullRequest, Repository,
        TaskScope, Ticket,
    },
    workspace::Workspaces,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

// ── builders ─────────────────────────────────────────────────────────────────

pub fn repo(full_name: &str) -> Repository {
    let name = full_name.rsplit('/').next().unwrap_or(full_name);
    Repository {
        name: name.into(),
        full_name: full_name.into(),
        clone_url: format!("https://example.test/{full_name}.git"),
        default_branch: "main".into(),
        description: None,
        private: false,
    }
}

pub fn ticket(key: &str) -> Ticket {
    Ticket {
        id: key.into(),
        external_id: key.into(),
        title: format!("Fix {key}"),
        description: "Something is broken".into(),
        provider: "test".into(),
        url: Some(format!("https://tickets.test/browse/{key}")),
        ..Default::default()
    }
}

pub fn assessment(confidence: f64, scope: TaskScope, affected: &[&str]) -> AssessmentResult {
    AssessmentResult {
        confidence,
        scope,
        risk_factors: vec!["touches billing".into()],
        decisions_required: vec![],
        estimated_files: 2,
        affected_repositories: affected.iter().map(|s| s.to_string()).collect(),
        reasoning: "small and well specified".into(),
    }
}

pub fn completed(create_pull_request: bool) -> AgentResult {
    AgentResult {
        completed: true,
        create_pull_request,
        skip_reason: (!create_pull_request).then(|| "already fixed upstream".to_string()),
        summary: "did the work".into(),
        cost_in_dollars: Some(0.42),
        ..Default::default()
    }
}

pub fn config() -> Config {
    Config::from_lookup(|_| None).unwrap()
}

// ── fake agent ───────────────────────────────────────────────────────────────

type ExecuteFn = Box<dyn Fn(usize) -> Result<AgentResult> + Send + Sync>;

pub struct FakeAgent {
    pub assessment: Mutex<Option<AssessmentResult>>,
    execute: ExecuteFn,
    pub assess_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
    pub seen_workspaces: Mutex<Vec<Vec<PathBuf>>>,
    pub seen_assessment: Mutex<Vec<bool>>,
}

impl FakeAgent {
    pub fn new(
        assessment: AssessmentResult,
        execute: impl Fn(usize) -> Result<AgentResult> + Send + Sync + 'static,
    ) -> Self {
        Self {
            assessment: Mutex::new(Some(assessment)),
            execute: Box::new(execute),
            assess_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            seen_workspaces: Mutex::new(Vec::new()),
            seen_assessment: Mutex::new(Vec::new()),
        }
    }

    pub fn assess_calls(&self) -> usize {
        self.assess_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodingAgent for FakeAgent {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn assess(&self, _ticket: &Ticket, _repositories: &[Repository]) -> Result<AssessmentResult> {
        self.assess_calls.fetch_add(1, Ordering::SeqCst);
        self.assessment
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("assessment unavailable"))
    }

    async fn execute(
        &self,
        _ticket: &Ticket,
        workspaces: &[PathBuf],
        assessment: Option<&AssessmentResult>,
        _config: &AgentConfig,
    ) -> Result<AgentResult> {
        let n = self.execute_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen_workspaces.lock().unwrap().push(workspaces.to_vec());
        self.seen_assessment.lock().unwrap().push(assessment.is_some());
        (self.execute)(n)
    }
}

// ── fake source control ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeSourceControl {
    pub repositories: Vec<Repository>,
    pub pushes: Mutex<Vec<(PathBuf, String)>>,
    pub requests: Mutex<Vec<CreatePullRequest>>,
    pub fail_push_for: Option<PathBuf>,
}

impl FakeSourceControl {
    pub fn with_repositories(repositories: Vec<Repository>) -> Self {
        Self {
            repositories,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.repositories.clone())
    }

    async fn clone_repository(&self, _repository: &Repository, _dest: &Path) -> Result<()> {
        Ok(())
    }

    async fn pull_latest(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    async fn push_branch(&self, path: &Path, branch: &str) -> Result<()> {
        if self.fail_push_for.as_deref() == Some(path) {
            bail!("remote rejected push");
        }
        self.pushes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), branch.to_string()));
        Ok(())
    }

    async fn create_pull_request(&self, request: CreatePullRequest) -> Result<PullRequest> {
        let mut requests = self.requests.lock().unwrap();
        let number = requests.len() as u64 + 1;
        let pr = PullRequest {
            number,
            url: format!("https://example.test/{}/{}/pull/{number}", request.owner, request.repo),
            title: request.title.clone(),
            head_branch: request.head.clone(),
            base_branch: request.base.clone(),
        };
        requests.push(request);
        Ok(pr)
    }
}

// ── fake workspaces ──────────────────────────────────────────────────────────

/// Paths are synthetic: `/fake/<owner>--<name>--<task>`.
#[derive(Default)]
pub struct FakeWorkspaces {
    /// Repositories whose branch diverges once the agent has run.
    pub diverged: HashSet<String>,
    /// Repositories left with uncommitted changes by the agent.
    pub dirty: HashSet<String>,
    pub fail_prepare_for: Option<String>,
    pub fail_cleanup_for: Option<String>,
    pub prepared: Mutex<Vec<PathBuf>>,
    pub cleaned: Mutex<Vec<PathBuf>>,
    pub committed: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeWorkspaces {
    pub fn path_for(full_name: &str, task_id: &str) -> PathBuf {
        PathBuf::from(format!("/fake/{}--{task_id}", full_name.replace('/', "--")))
    }

    fn full_name_of(path: &Path) -> String {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        let mut parts = name.splitn(3, "--");
        format!("{}/{}", parts.next().unwrap(), parts.next().unwrap())
    }

    pub fn prepared(&self) -> Vec<PathBuf> {
        self.prepared.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> Vec<PathBuf> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl Workspaces for FakeWorkspaces {
    async fn prepare_workspace(&self, repository: &Repository, task_id: &str) -> Result<PathBuf> {
        if self.fail_prepare_for.as_deref() == Some(repository.full_name.as_str()) {
            bail!("worktree add failed for {}", repository.full_name);
        }
        let path = Self::path_for(&repository.full_name, task_id);
        self.prepared.lock().unwrap().push(path.clone());
        Ok(path)
    }

    async fn has_uncommitted_changes(&self, path: &Path) -> Result<bool> {
        let name = Self::full_name_of(path);
        let committed = self.committed.lock().unwrap().iter().any(|(p, _)| p == path);
        Ok(self.dirty.contains(&name) && !committed)
    }

    async fn has_branch_diverged(&self, path: &Path, _base: &str) -> Result<bool> {
        let name = Self::full_name_of(path);
        let committed = self.committed.lock().unwrap().iter().any(|(p, _)| p == path);
        Ok(self.diverged.contains(&name) || committed)
    }

    async fn commit_changes(&self, path: &Path, message: &str) -> Result<bool> {
        self.committed
            .lock()
            .unwrap()
            .push((path.to_path_buf(), message.to_string()));
        Ok(true)
    }

    async fn cleanup_workspace(&self, path: &Path) -> Result<()> {
        self.cleaned.lock().unwrap().push(path.to_path_buf());
        if self.fail_cleanup_for.as_deref() == Some(Self::full_name_of(path).as_str()) {
            bail!("worktree remove failed");
        }
        Ok(())
    }
}

// ── wiring ───────────────────────────────────────────────────────────────────

pub struct Harness {
    pub agent: Arc<FakeAgent>,
    pub source_control: Arc<FakeSourceControl>,
    pub workspaces: Arc<FakeWorkspaces>,
    pub orchestrator: TaskOrchestrator,
}

pub fn harness(
    config: Config,
    agent: FakeAgent,
    source_control: FakeSourceControl,
    workspaces: FakeWorkspaces,
) -> Harness {
    let agent = Arc::new(agent);
    let source_control = Arc::new(source_control);
    let workspaces = Arc::new(workspaces);

    let pull_requests = PullRequestService::new(
        source_control.clone(),
        workspaces.clone(),
        config.bot_name.clone(),
    );
    let execution = ExecutionService::new(
        agent.clone(),
        workspaces.clone(),
        pull_requests,
        config.execution.clone(),
    );
    let assessment = AssessmentService::new(
        agent.clone(),
        source_control.clone(),
        config.assessment.clone(),
    );
    let orchestrator = TaskOrchestrator::new(Arc::new(assessment), Arc::new(execution));

    Harness {
        agent,
        source_control,
        workspaces,
        orchestrator,
    }
}
