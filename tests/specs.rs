// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace integration specs: consensus and the replicated state machine
//! working together, the way the daemon wires them.
//!
//! Each member runs a real consensus driver over the in-memory mesh and a
//! pump task that applies committed entries to its own `ClusterState`.
//! Whichever member is leader also acts on apply results by proposing the
//! follow-up entries, the same contract as the daemon's apply bus.

use mesh_core::entry::Command;
use mesh_core::test_support::{conditional_task_def, shell_task_def, workflow};
use mesh_core::{
    FakeClock, NodeId, RetryPolicy, Task, TaskId, TaskResult, TaskState, Workflow, WorkflowState,
};
use mesh_raft::{Applied, InMemoryMesh, RaftConfig, RaftHandle, RaftNode};
use mesh_state::{Action, ClusterState};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

struct Member {
    id: NodeId,
    raft: RaftHandle,
    state: Arc<Mutex<ClusterState>>,
}

struct Cluster {
    members: Vec<Member>,
    _dir: tempfile::TempDir,
}

impl Cluster {
    async fn spawn(n: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mesh = InMemoryMesh::new();
        let ids: Vec<NodeId> = (1..=n).map(|i| NodeId::from_string(format!("n{i}"))).collect();

        let mut members = Vec::new();
        for id in &ids {
            let config = RaftConfig {
                id: *id,
                peers: ids.iter().filter(|p| *p != id).copied().collect(),
                voters: ids.clone(),
                election_timeout_min: Duration::from_millis(150),
                election_timeout_max: Duration::from_millis(300),
                heartbeat_interval: Duration::from_millis(50),
                meta_path: dir.path().join(format!("{id}.meta.json")),
            };
            let transport = Arc::new(mesh.endpoint(*id));
            let (node, raft, mut apply_rx) =
                RaftNode::new(config, FakeClock::new(), transport, None).unwrap();
            mesh.register(*id, raft.clone());
            tokio::spawn(node.run());

            let state = Arc::new(Mutex::new(ClusterState::default()));
            // The apply pump: every member applies; the leader also turns
            // actions into follow-up proposals.
            let pump_state = Arc::clone(&state);
            let pump_raft = raft.clone();
            tokio::spawn(async move {
                while let Some(item) = apply_rx.recv().await {
                    let Applied::Entry(entry) = item else { continue };
                    let actions = pump_state.lock().apply(&entry);
                    if !pump_raft.is_leader() {
                        continue;
                    }
                    for action in actions {
                        let raft = pump_raft.clone();
                        tokio::spawn(async move {
                            let command = match action {
                                Action::RetryTask { task_id, attempt, scheduled_after_ms } => {
                                    Command::TaskRetry { task_id, attempt, scheduled_after_ms }
                                }
                                Action::DeadLetterTask { task_id, reason } => {
                                    Command::TaskDeadLetter { task_id, reason }
                                }
                                Action::AdvanceWorkflow { workflow_id } => {
                                    Command::WorkflowAdvance { workflow_id }
                                }
                                // The cancel RPC has no state-machine echo.
                                Action::CancelRunning { .. } => return,
                            };
                            let _ = raft.propose(command).await;
                        });
                    }
                }
            });
            members.push(Member { id: *id, raft, state });
        }
        Cluster { members, _dir: dir }
    }

    async fn leader(&self) -> &Member {
        for _ in 0..500 {
            if let Some(member) = self.members.iter().find(|m| m.raft.is_leader()) {
                return member;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("no leader elected");
    }

    /// Wait until `predicate` holds on every member's state.
    async fn converge(&self, predicate: impl Fn(&ClusterState) -> bool) {
        let ok = timeout(Duration::from_secs(30), async {
            loop {
                if self.members.iter().all(|m| predicate(&m.state.lock())) {
                    return;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(ok.is_ok(), "cluster never converged");
    }
}

fn queued_shell_task(id: &str) -> Task {
    mesh_core::test_support::shell_task(id)
}

/// Drive one task through assign → started → complete on the leader.
async fn run_to_completion(leader: &Member, task_id: TaskId, stdout: &str, exit_code: i32) {
    let node_id = leader.id;
    leader
        .raft
        .propose(Command::TaskAssign { task_id, node_id })
        .await
        .unwrap();
    leader
        .raft
        .propose(Command::TaskStarted { task_id, node_id })
        .await
        .unwrap();
    leader
        .raft
        .propose(Command::TaskComplete {
            task_id,
            result: TaskResult {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        })
        .await
        .unwrap();
}

fn member_tasks(wf: &Workflow) -> Vec<Task> {
    wf.definition
        .tasks
        .keys()
        .map(|key| {
            let mut task = queued_shell_task(&format!("tsk-{key}"));
            task.workflow_id = Some(wf.id);
            task.task_key = Some(key.clone());
            task.state = TaskState::Pending;
            task
        })
        .collect()
}

fn task_state(state: &Arc<Mutex<ClusterState>>, id: &str) -> TaskState {
    state.lock().get_task(id).map(|t| t.state).unwrap_or(TaskState::Pending)
}

// Every member sees the same committed prefix and materializes the same
// state, per the replicated-log safety contract.
#[tokio::test(start_paused = true)]
async fn replicated_states_are_identical() {
    let cluster = Cluster::spawn(3).await;
    let leader = cluster.leader().await;

    for i in 0..5 {
        leader
            .raft
            .propose(Command::TaskSubmit { task: queued_shell_task(&format!("tsk-{i}")) })
            .await
            .unwrap();
    }
    cluster.converge(|s| s.tasks.len() == 5 && s.last_applied >= 5).await;

    let reference = serde_json::to_value(&*cluster.members[0].state.lock()).unwrap();
    for member in &cluster.members[1..] {
        let theirs = serde_json::to_value(&*member.state.lock()).unwrap();
        assert_eq!(theirs, reference);
    }
}

// The linear workflow scenario, driven end to end through consensus:
// A unlocks B unlocks C, then the workflow completes.
#[tokio::test(start_paused = true)]
async fn linear_workflow_through_consensus() {
    let cluster = Cluster::spawn(3).await;
    let leader = cluster.leader().await;

    let wf = workflow(
        "wkf-lin",
        "linear",
        vec![
            ("a", shell_task_def("echo a", &[])),
            ("b", shell_task_def("echo b", &["a"])),
            ("c", shell_task_def("echo c", &["b"])),
        ],
    );
    let tasks = member_tasks(&wf);
    leader
        .raft
        .propose(Command::WorkflowSubmit { workflow: wf, tasks })
        .await
        .unwrap();

    cluster.converge(|s| s.get_task("tsk-a").map(|t| t.state == TaskState::Queued).unwrap_or(false)).await;
    assert_eq!(task_state(&leader.state, "tsk-b"), TaskState::Pending);

    run_to_completion(leader, TaskId::from_string("tsk-a"), "a-out", 0).await;
    cluster.converge(|s| s.get_task("tsk-b").map(|t| t.state == TaskState::Queued).unwrap_or(false)).await;
    assert_eq!(task_state(&leader.state, "tsk-c"), TaskState::Pending);

    run_to_completion(leader, TaskId::from_string("tsk-b"), "b-out", 0).await;
    cluster.converge(|s| s.get_task("tsk-c").map(|t| t.state == TaskState::Queued).unwrap_or(false)).await;

    run_to_completion(leader, TaskId::from_string("tsk-c"), "c-out", 0).await;
    cluster
        .converge(|s| {
            s.get_workflow("wkf-lin").map(|w| w.state == WorkflowState::Completed).unwrap_or(false)
        })
        .await;
}

// The conditional-skip scenario: "version: 2.0" routes to skip_upgrade,
// upgrade is skipped, and the workflow still completes.
#[tokio::test(start_paused = true)]
async fn conditional_branch_through_consensus() {
    let cluster = Cluster::spawn(3).await;
    let leader = cluster.leader().await;

    let wf = workflow(
        "wkf-gate",
        "upgrade-gate",
        vec![
            ("check", shell_task_def("check-version", &[])),
            (
                "upgrade",
                conditional_task_def(
                    "run-upgrade",
                    &["check"],
                    r#"parent.check.stdout.includes("version: 1.")"#,
                ),
            ),
            (
                "skip_upgrade",
                conditional_task_def(
                    "log-skip",
                    &["check"],
                    r#"!parent.check.stdout.includes("version: 1.")"#,
                ),
            ),
        ],
    );
    let tasks = member_tasks(&wf);
    leader
        .raft
        .propose(Command::WorkflowSubmit { workflow: wf, tasks })
        .await
        .unwrap();
    cluster
        .converge(|s| s.get_task("tsk-check").map(|t| t.state == TaskState::Queued).unwrap_or(false))
        .await;

    run_to_completion(leader, TaskId::from_string("tsk-check"), "version: 2.0", 0).await;
    cluster
        .converge(|s| {
            s.get_task("tsk-upgrade").map(|t| t.state == TaskState::Skipped).unwrap_or(false)
                && s.get_task("tsk-skip_upgrade")
                    .map(|t| t.state == TaskState::Queued)
                    .unwrap_or(false)
        })
        .await;

    run_to_completion(leader, TaskId::from_string("tsk-skip_upgrade"), "done", 0).await;
    cluster
        .converge(|s| {
            s.get_workflow("wkf-gate").map(|w| w.state == WorkflowState::Completed).unwrap_or(false)
        })
        .await;
}

// Exponential backoff under consensus: each failure doubles the gate, the
// fourth dead-letters with a "Max retries" reason.
#[tokio::test(start_paused = true)]
async fn retries_then_dead_letter_through_consensus() {
    let cluster = Cluster::spawn(3).await;
    let leader = cluster.leader().await;

    let mut task = queued_shell_task("tsk-flaky");
    task.retry = RetryPolicy::default(); // 3 retries, 1000ms, x2
    leader.raft.propose(Command::TaskSubmit { task }).await.unwrap();

    for attempt in 1..=3u32 {
        cluster
            .converge(|s| {
                s.get_task("tsk-flaky").map(|t| t.state == TaskState::Queued).unwrap_or(false)
            })
            .await;
        let node_id = leader.id;
        let task_id = TaskId::from_string("tsk-flaky");
        leader.raft.propose(Command::TaskAssign { task_id, node_id }).await.unwrap();
        leader.raft.propose(Command::TaskStarted { task_id, node_id }).await.unwrap();
        leader
            .raft
            .propose(Command::TaskFailed {
                task_id,
                error: "exit 1".into(),
                result: None,
            })
            .await
            .unwrap();

        // The leader's pump turns the failure into a committed retry.
        cluster
            .converge(move |s| {
                s.get_task("tsk-flaky").map(|t| t.attempt == attempt).unwrap_or(false)
            })
            .await;
        // The fake clocks stand still at 1_000_000, so the gate is exactly
        // failure time + 1000 * 2^(attempt-1).
        let backoff = 1000 * 2u64.pow(attempt - 1);
        let task = leader.state.lock().get_task("tsk-flaky").unwrap().clone();
        assert_eq!(task.scheduled_after_ms, Some(1_000_000 + backoff));
    }

    // Out of retries: the fourth failure dead-letters.
    let node_id = leader.id;
    let task_id = TaskId::from_string("tsk-flaky");
    leader.raft.propose(Command::TaskAssign { task_id, node_id }).await.unwrap();
    leader.raft.propose(Command::TaskStarted { task_id, node_id }).await.unwrap();
    leader
        .raft
        .propose(Command::TaskFailed { task_id, error: "exit 1".into(), result: None })
        .await
        .unwrap();

    cluster
        .converge(|s| {
            s.get_task("tsk-flaky").map(|t| t.state == TaskState::DeadLetter).unwrap_or(false)
        })
        .await;
    let task = leader.state.lock().get_task("tsk-flaky").unwrap().clone();
    assert!(task.error.as_deref().unwrap_or("").contains("Max retries"));
}

// Node loss requeues stranded work everywhere, with attempt bumped.
#[tokio::test(start_paused = true)]
async fn node_offline_requeues_through_consensus() {
    let cluster = Cluster::spawn(3).await;
    let leader = cluster.leader().await;

    let worker = mesh_core::test_support::active_node("w1");
    leader.raft.propose(Command::NodeJoin { node: worker.clone() }).await.unwrap();
    leader.raft.propose(Command::NodeApprove { node_id: worker.id }).await.unwrap();

    for i in 0..5 {
        let task_id = TaskId::from_string(format!("tsk-{i}"));
        leader
            .raft
            .propose(Command::TaskSubmit { task: queued_shell_task(&format!("tsk-{i}")) })
            .await
            .unwrap();
        leader
            .raft
            .propose(Command::TaskAssign { task_id, node_id: worker.id })
            .await
            .unwrap();
        leader
            .raft
            .propose(Command::TaskStarted { task_id, node_id: worker.id })
            .await
            .unwrap();
    }

    leader.raft.propose(Command::NodeOffline { node_id: worker.id }).await.unwrap();

    cluster
        .converge(|s| {
            (0..5).all(|i| {
                s.get_task(&format!("tsk-{i}"))
                    .map(|t| {
                        t.state == TaskState::Queued
                            && t.assigned_node.is_none()
                            && t.attempt == 1
                            && t.scheduled_after_ms.is_some()
                    })
                    .unwrap_or(false)
            })
        })
        .await;
}

// A workflow with no tasks commits as immediately completed.
#[tokio::test(start_paused = true)]
async fn empty_workflow_completes_immediately() {
    let cluster = Cluster::spawn(1).await;
    let leader = cluster.leader().await;

    let wf = workflow("wkf-empty", "empty", vec![]);
    leader
        .raft
        .propose(Command::WorkflowSubmit { workflow: wf, tasks: vec![] })
        .await
        .unwrap();

    cluster
        .converge(|s| {
            s.get_workflow("wkf-empty")
                .map(|w| w.state == WorkflowState::Completed)
                .unwrap_or(false)
        })
        .await;
}
