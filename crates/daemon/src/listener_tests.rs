// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::membership::MembershipManager;
use crate::test_helpers::{leader_fixture, wait_for, Fixture};
use crate::updater::RollingUpdater;
use mesh_core::test_support::{active_node, shell_task_def};
use mesh_core::{FakeClock, NodeId, TaskConstraints};
use indexmap::IndexMap;
use mesh_wire::Request;
use std::collections::HashMap;

async fn ctx_for(fixture: &Fixture) -> Arc<ListenerCtx<FakeClock>> {
    let dir = std::env::temp_dir();
    let config = Arc::new(ClusterConfig::default());
    let membership = Arc::new(MembershipManager::new(
        Arc::clone(&config),
        fixture.raft.clone(),
        Arc::clone(&fixture.state),
        fixture.clock.clone(),
    ));
    let updater = Arc::new(RollingUpdater::new(
        Arc::clone(&config),
        fixture.raft.clone(),
        Arc::clone(&fixture.state),
        fixture.peers.clone(),
        dir.join("update.bin"),
        dir.join("meshd.bin.bak"),
        fixture.clock.clone(),
    ));
    Arc::new(ListenerCtx {
        config,
        raft: fixture.raft.clone(),
        state: Arc::clone(&fixture.state),
        membership,
        updater,
        hub: Arc::new(OutputHub::new(1024 * 1024)),
        clock: fixture.clock.clone(),
        start_time: Instant::now(),
        shutdown: Arc::new(Notify::new()),
    })
}

fn shell_submit(command: &str) -> Request {
    Request::SubmitTask {
        spec: TaskSpec::Shell { command: command.into(), env: HashMap::new(), cwd: None },
        priority: 0,
        constraints: None,
        retry: None,
    }
}

#[tokio::test(start_paused = true)]
async fn submit_commits_and_is_queryable() {
    let fixture = leader_fixture("n1").await;
    let ctx = ctx_for(&fixture).await;

    let response = handle_request(shell_submit("echo hi"), &ctx).await;
    let Response::TaskSubmitted { task_id } = response else {
        panic!("expected TaskSubmitted, got {response:?}");
    };

    wait_for(&fixture.state, |s| s.get_task(task_id.as_str()).is_some()).await;

    let response =
        handle_request(Request::TaskStatus { id: task_id.to_string() }, &ctx).await;
    match response {
        Response::Task { task: Some(task) } => {
            assert_eq!(task.summary.state, TaskState::Queued);
        }
        other => panic!("expected task, got {other:?}"),
    }

    // Default retry policy fills in when the submit omits one.
    let task = fixture.state.read().get_task(task_id.as_str()).unwrap().clone();
    assert_eq!(task.retry.max_retries, 3);
}

#[tokio::test(start_paused = true)]
async fn invalid_specs_are_rejected() {
    let fixture = leader_fixture("n1").await;
    let ctx = ctx_for(&fixture).await;

    let response = handle_request(shell_submit("   "), &ctx).await;
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::InvalidRequest),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn impossible_constraints_are_rejected_at_submit() {
    let fixture = leader_fixture("n1").await;
    {
        let mut state = fixture.state.write();
        let node = active_node("n2"); // no GPU
        state.nodes.insert(node.id, node);
    }
    let ctx = ctx_for(&fixture).await;

    let request = Request::SubmitTask {
        spec: TaskSpec::Shell { command: "train".into(), env: HashMap::new(), cwd: None },
        priority: 0,
        constraints: Some(TaskConstraints { gpu: true, ..TaskConstraints::default() }),
        retry: None,
    };
    let response = handle_request(request, &ctx).await;
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::NoEligibleNodes),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn workflow_submit_creates_members_and_status_reports_them() {
    let fixture = leader_fixture("n1").await;
    let ctx = ctx_for(&fixture).await;

    let mut tasks = IndexMap::new();
    tasks.insert("a".to_string(), shell_task_def("echo a", &[]));
    tasks.insert("b".to_string(), shell_task_def("echo b", &["a"]));
    let request = Request::SubmitWorkflow {
        definition: WorkflowDef { name: "two-step".into(), tasks, context: HashMap::new() },
    };

    let response = handle_request(request, &ctx).await;
    let Response::WorkflowSubmitted { workflow_id } = response else {
        panic!("expected WorkflowSubmitted, got {response:?}");
    };
    wait_for(&fixture.state, |s| s.get_workflow(workflow_id.as_str()).is_some()).await;

    let response =
        handle_request(Request::WorkflowStatus { id: workflow_id.to_string() }, &ctx).await;
    match response {
        Response::Workflow { workflow: Some(detail) } => {
            assert_eq!(detail.tasks["a"], TaskState::Queued);
            assert_eq!(detail.tasks["b"], TaskState::Pending);
            assert_eq!(detail.summary.state, WorkflowState::Running);
        }
        other => panic!("expected workflow, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_is_benign_on_terminal_tasks() {
    let fixture = leader_fixture("n1").await;
    let ctx = ctx_for(&fixture).await;

    let Response::TaskSubmitted { task_id } =
        handle_request(shell_submit("echo hi"), &ctx).await
    else {
        panic!("submit failed");
    };
    wait_for(&fixture.state, |s| s.get_task(task_id.as_str()).is_some()).await;

    assert_eq!(
        handle_request(Request::CancelTask { id: task_id.to_string() }, &ctx).await,
        Response::Ok
    );
    wait_for(&fixture.state, |s| {
        s.get_task(task_id.as_str()).map(|t| t.state == TaskState::Cancelled).unwrap_or(false)
    })
    .await;

    // Second cancel: still success, still cancelled.
    assert_eq!(
        handle_request(Request::CancelTask { id: task_id.to_string() }, &ctx).await,
        Response::Ok
    );
    assert_eq!(
        fixture.state.read().get_task(task_id.as_str()).unwrap().state,
        TaskState::Cancelled
    );
}

#[tokio::test(start_paused = true)]
async fn status_reports_role_and_counts() {
    let fixture = leader_fixture("n1").await;
    let ctx = ctx_for(&fixture).await;

    let response = handle_request(Request::Status, &ctx).await;
    match response {
        Response::Status { role, leader, tasks_queued, .. } => {
            assert_eq!(role, "leader");
            assert_eq!(leader, Some(NodeId::from_string("n1")));
            assert_eq!(tasks_queued, 0);
        }
        other => panic!("expected status, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn unknown_task_queries_answer_cleanly() {
    let fixture = leader_fixture("n1").await;
    let ctx = ctx_for(&fixture).await;

    let response = handle_request(Request::TaskStatus { id: "tsk-ghost".into() }, &ctx).await;
    assert_eq!(response, Response::Task { task: None });

    let response =
        handle_request(Request::CancelTask { id: "tsk-ghost".into() }, &ctx).await;
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::InvalidRequest),
        other => panic!("expected error, got {other:?}"),
    }
}
