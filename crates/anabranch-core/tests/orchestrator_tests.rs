mod common;

use anabranch_core::{
    orchestrator::Orchestrator,
    types::{AgentResult, Task, TaskScope, TaskStatus},
};
use anyhow::anyhow;
use common::*;

const WEB: &str = "acme/web";
const API: &str = "acme/api";

fn two_repos() -> FakeSourceControl {
    FakeSourceControl::with_repositories(vec![repo(WEB), repo(API)])
}

#[tokio::test]
async fn test_two_repositories_one_changed_opens_one_pull_request() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(85.0, TaskScope::Small, &[WEB, API]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces {
            diverged: [API.to_string()].into(),
            ..Default::default()
        },
    );

    let mut task = Task::new("t1", ticket("ENG-1"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.pull_requests.len(), 1);
    assert_eq!(task.pull_requests[0].head_branch, "anabranch/t1");
    assert_eq!(task.pull_requests[0].title, "[Anabranch] Fix ENG-1");
    assert!(task.pull_requests[0].url.contains("acme/api"));
    assert_eq!(task.assessment.as_ref().unwrap().confidence, 85.0);
    assert_eq!(task.result.as_ref().unwrap().cost_in_dollars, Some(0.42));
    assert!(task.error_message.is_none());

    assert_eq!(h.workspaces.prepared().len(), 2);
    assert_eq!(h.workspaces.cleaned().len(), 2);
    assert_eq!(h.agent.execute_calls(), 1);
    assert_eq!(h.agent.seen_workspaces.lock().unwrap()[0].len(), 2);
}

#[tokio::test]
async fn test_low_confidence_is_skipped_before_any_workspace() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(40.0, TaskScope::Small, &[WEB]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces::default(),
    );

    let mut task = Task::new("t2", ticket("ENG-2"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Skipped);
    assert!(task.skip_reason.unwrap().contains("confidence 40"));
    assert!(task.assessment.is_some());
    assert!(task.result.is_none());
    assert!(h.workspaces.prepared().is_empty());
    assert_eq!(h.agent.execute_calls(), 0);
}

#[tokio::test]
async fn test_scope_above_maximum_is_skipped() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(99.0, TaskScope::Large, &[WEB]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces::default(),
    );

    let mut task = Task::new("t3", ticket("ENG-3"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Skipped);
    assert_eq!(h.agent.execute_calls(), 0);
}

#[tokio::test]
async fn test_agent_errors_exhaust_retries_then_fail() {
    let mut cfg = config();
    cfg.execution.retries = 2;
    let h = harness(
        cfg,
        FakeAgent::new(assessment(90.0, TaskScope::Trivial, &[WEB]), |n| {
            Err(anyhow!("agent crashed on attempt {n}"))
        }),
        two_repos(),
        FakeWorkspaces::default(),
    );

    let mut task = Task::new("t4", ticket("ENG-4"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    let message = task.error_message.unwrap();
    assert!(message.contains("attempt 3"), "{message}");
    assert_eq!(h.agent.execute_calls(), 3);
    // One workspace per attempt, each reclaimed.
    assert_eq!(h.workspaces.prepared().len(), 3);
    assert_eq!(h.workspaces.cleaned(), h.workspaces.prepared());
    assert!(task.pull_requests.is_empty());
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failure() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(90.0, TaskScope::Small, &[WEB]), |n| {
            if n == 1 {
                Err(anyhow!("rate limited"))
            } else {
                Ok(completed(true))
            }
        }),
        two_repos(),
        FakeWorkspaces {
            diverged: [WEB.to_string()].into(),
            ..Default::default()
        },
    );

    let mut task = Task::new("t5", ticket("ENG-5"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(h.agent.execute_calls(), 2);
    assert_eq!(task.pull_requests.len(), 1);
    assert_eq!(h.source_control.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_incomplete_agent_run_counts_as_failure() {
    let mut cfg = config();
    cfg.execution.retries = 0;
    let h = harness(
        cfg,
        FakeAgent::new(assessment(90.0, TaskScope::Small, &[WEB]), |_| {
            Ok(AgentResult {
                completed: false,
                summary: "tests would not pass".into(),
                ..Default::default()
            })
        }),
        two_repos(),
        FakeWorkspaces::default(),
    );

    let mut task = Task::new("t6", ticket("ENG-6"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .unwrap()
        .contains("tests would not pass"));
    assert_eq!(h.workspaces.cleaned().len(), 1);
}

#[tokio::test]
async fn test_agent_decline_skips_with_reason_and_cleans_up() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(90.0, TaskScope::Small, &[WEB, API]), |_| {
            Ok(completed(false))
        }),
        two_repos(),
        FakeWorkspaces {
            diverged: [WEB.to_string()].into(),
            ..Default::default()
        },
    );

    let mut task = Task::new("t7", ticket("ENG-7"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Skipped);
    assert_eq!(task.skip_reason.as_deref(), Some("already fixed upstream"));
    assert!(task.error_message.is_none());
    assert!(task.pull_requests.is_empty());
    assert!(h.source_control.pushes.lock().unwrap().is_empty());
    assert_eq!(h.workspaces.cleaned().len(), 2);
    assert_eq!(h.agent.execute_calls(), 1);
}

#[tokio::test]
async fn test_bypassed_assessment_executes_against_all_repositories() {
    let mut cfg = config();
    cfg.assessment.skip = true;
    let h = harness(
        cfg,
        FakeAgent::new(assessment(0.0, TaskScope::Architectural, &[]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces {
            dirty: [WEB.to_string()].into(),
            ..Default::default()
        },
    );

    let mut task = Task::new("t8", ticket("ENG-8"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert!(task.assessment.is_none());
    assert_eq!(h.agent.assess_calls(), 0);
    assert_eq!(h.workspaces.prepared().len(), 2);
    assert_eq!(*h.agent.seen_assessment.lock().unwrap(), vec![false]);

    // Uncommitted agent output is committed and then published.
    let committed = h.workspaces.committed.lock().unwrap().clone();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].1, "ENG-8: Fix ENG-8");
    assert_eq!(task.pull_requests.len(), 1);
}

#[tokio::test]
async fn test_no_affected_repositories_is_skipped() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(95.0, TaskScope::Trivial, &[]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces::default(),
    );

    let mut task = Task::new("t9", ticket("ENG-9"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Skipped);
    assert_eq!(
        task.skip_reason.as_deref(),
        Some("no affected repositories identified")
    );
    assert!(h.workspaces.prepared().is_empty());
}

#[tokio::test]
async fn test_affected_repositories_match_without_regard_to_case() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(95.0, TaskScope::Small, &["Acme/Web"]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces::default(),
    );

    let mut task = Task::new("t10", ticket("ENG-10"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert!(task.skip_reason.is_none());
    let prepared = h.workspaces.prepared();
    assert_eq!(prepared.len(), 1);
    assert_eq!(prepared[0], FakeWorkspaces::path_for(WEB, "t10"));
}

#[tokio::test]
async fn test_unrecognised_affected_repositories_execute_against_all() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(95.0, TaskScope::Trivial, &["other/repo"]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces::default(),
    );

    let mut task = Task::new("t10b", ticket("ENG-10"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(h.workspaces.prepared().len(), 2);
    assert_eq!(h.agent.execute_calls(), 1);
}

#[tokio::test]
async fn test_preparation_failure_never_invokes_agent() {
    let mut cfg = config();
    cfg.execution.retries = 1;
    let h = harness(
        cfg,
        FakeAgent::new(assessment(90.0, TaskScope::Small, &[WEB, API]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces {
            fail_prepare_for: Some(API.to_string()),
            ..Default::default()
        },
    );

    let mut task = Task::new("t11", ticket("ENG-11"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("acme/api"));
    assert_eq!(h.agent.execute_calls(), 0);
    // Only the workspace that was prepared on each attempt is cleaned.
    assert_eq!(h.workspaces.prepared().len(), 2);
    assert_eq!(h.workspaces.cleaned(), h.workspaces.prepared());
}

#[tokio::test]
async fn test_cleanup_failure_does_not_fail_task() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(90.0, TaskScope::Small, &[WEB, API]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces {
            diverged: [WEB.to_string(), API.to_string()].into(),
            fail_cleanup_for: Some(WEB.to_string()),
            ..Default::default()
        },
    );

    let mut task = Task::new("t12", ticket("ENG-12"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.pull_requests.len(), 2);
    assert_eq!(h.workspaces.cleaned().len(), 2);
}

#[tokio::test]
async fn test_assessment_failure_is_recorded() {
    let agent = FakeAgent::new(assessment(90.0, TaskScope::Small, &[WEB]), |_| {
        Ok(completed(true))
    });
    *agent.assessment.lock().unwrap() = None;
    let h = harness(config(), agent, two_repos(), FakeWorkspaces::default());

    let mut task = Task::new("t13", ticket("ENG-13"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task
        .error_message
        .unwrap()
        .contains("assessment unavailable"));
    assert!(task.assessment.is_none());
}

#[tokio::test]
async fn test_out_of_range_confidence_fails_the_task() {
    let h = harness(
        config(),
        FakeAgent::new(assessment(140.0, TaskScope::Small, &[WEB]), |_| {
            Ok(completed(true))
        }),
        two_repos(),
        FakeWorkspaces::default(),
    );

    let mut task = Task::new("t14", ticket("ENG-14"));
    h.orchestrator.handle_task(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.assessment.is_none());
}
