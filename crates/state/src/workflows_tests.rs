// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::actions::Action;
use crate::machine::ClusterState;
use mesh_core::entry::Command;
use mesh_core::test_support::{conditional_task_def, entry, shell_task_def, workflow};
use mesh_core::{
    RetryPolicy, Task, TaskId, TaskResult, TaskState, Workflow, WorkflowId, WorkflowState,
};

fn member(wf: &Workflow, key: &str) -> Task {
    Task::builder()
        .id(format!("tsk-{key}"))
        .workflow_id(wf.id)
        .task_key(key)
        .state(TaskState::Pending)
        .build()
}

/// Submit a workflow with leader-built member tasks, the way the daemon does.
fn submit(state: &mut ClusterState, index: u64, wf: Workflow) -> Vec<Action> {
    let tasks: Vec<Task> = wf.definition.tasks.keys().map(|k| member(&wf, k)).collect();
    state.apply(&entry(index, Command::WorkflowSubmit { workflow: wf, tasks }))
}

fn task_state(state: &ClusterState, key: &str) -> TaskState {
    state.get_task(&format!("tsk-{key}")).unwrap().state
}

fn tid(key: &str) -> TaskId {
    TaskId::from_string(format!("tsk-{key}"))
}

fn wid(s: &str) -> WorkflowId {
    WorkflowId::from_string(s)
}

fn complete(
    state: &mut ClusterState,
    index: u64,
    key: &str,
    stdout: &str,
    exit_code: i32,
) -> Vec<Action> {
    state.apply(&entry(index, Command::TaskAssign { task_id: tid(key), node_id: "n2".into() }));
    state.apply(&entry(
        index + 1,
        Command::TaskStarted { task_id: tid(key), node_id: "n2".into() },
    ));
    state.apply(&entry(
        index + 2,
        Command::TaskComplete {
            task_id: tid(key),
            result: TaskResult { exit_code, stdout: stdout.into(), stderr: String::new() },
        },
    ))
}

fn advance(state: &mut ClusterState, index: u64, wf: &str) -> Vec<Action> {
    state.apply(&entry(index, Command::WorkflowAdvance { workflow_id: wid(wf) }))
}

// Linear chain A→B→C: each completion unlocks the next step.
#[test]
fn linear_workflow_unlocks_step_by_step() {
    let mut state = ClusterState::default();
    let wf = workflow(
        "wkf-lin",
        "linear",
        vec![
            ("a", shell_task_def("echo a", &[])),
            ("b", shell_task_def("echo b", &["a"])),
            ("c", shell_task_def("echo c", &["b"])),
        ],
    );
    submit(&mut state, 1, wf);

    assert_eq!(task_state(&state, "a"), TaskState::Queued);
    assert_eq!(task_state(&state, "b"), TaskState::Pending);
    assert_eq!(task_state(&state, "c"), TaskState::Pending);

    let actions = complete(&mut state, 2, "a", "a-out", 0);
    assert_eq!(actions, vec![Action::AdvanceWorkflow { workflow_id: wid("wkf-lin") }]);
    advance(&mut state, 5, "wkf-lin");
    assert_eq!(task_state(&state, "b"), TaskState::Queued);
    assert_eq!(task_state(&state, "c"), TaskState::Pending);

    complete(&mut state, 6, "b", "b-out", 0);
    advance(&mut state, 9, "wkf-lin");
    assert_eq!(task_state(&state, "c"), TaskState::Queued);

    complete(&mut state, 10, "c", "c-out", 0);
    advance(&mut state, 13, "wkf-lin");
    assert_eq!(state.get_workflow("wkf-lin").unwrap().state, WorkflowState::Completed);
}

// A version probe routes execution
// down exactly one of two branches.
#[test]
fn conditional_edges_route_one_branch_and_skip_the_other() {
    let mut state = ClusterState::default();
    let wf = workflow(
        "wkf-cond",
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
    submit(&mut state, 1, wf);
    assert_eq!(task_state(&state, "check"), TaskState::Queued);

    complete(&mut state, 2, "check", "version: 2.0", 0);
    advance(&mut state, 5, "wkf-cond");

    assert_eq!(task_state(&state, "upgrade"), TaskState::Skipped);
    assert_eq!(task_state(&state, "skip_upgrade"), TaskState::Queued);
    assert_eq!(state.get_workflow("wkf-cond").unwrap().state, WorkflowState::Running);

    complete(&mut state, 6, "skip_upgrade", "skipped it", 0);
    advance(&mut state, 9, "wkf-cond");

    // Skipped members don't fail the workflow.
    assert_eq!(state.get_workflow("wkf-cond").unwrap().state, WorkflowState::Completed);
}

#[test]
fn dead_lettered_member_cascades_skips_and_fails_the_workflow() {
    let mut state = ClusterState::default();
    let wf = workflow(
        "wkf-dead",
        "doomed",
        vec![
            ("a", shell_task_def("boom", &[])),
            ("b", shell_task_def("echo b", &["a"])),
            ("c", shell_task_def("echo c", &["b"])),
        ],
    );
    // Fail fast: no retries.
    let mut wf = wf;
    if let Some(def) = wf.definition.tasks.get_mut("a") {
        def.retry = Some(RetryPolicy { retryable: false, ..RetryPolicy::default() });
    }
    submit(&mut state, 1, wf);

    state.apply(&entry(2, Command::TaskAssign { task_id: tid("a"), node_id: "n2".into() }));
    state.apply(&entry(3, Command::TaskStarted { task_id: tid("a"), node_id: "n2".into() }));
    state.apply(&entry(
        4,
        Command::TaskFailed { task_id: tid("a"), error: "boom".into(), result: None },
    ));
    let actions = state.apply(&entry(
        5,
        Command::TaskDeadLetter { task_id: tid("a"), reason: "boom".into() },
    ));
    assert_eq!(actions, vec![Action::AdvanceWorkflow { workflow_id: wid("wkf-dead") }]);

    // First advance skips b; the second pass (same entry) skips c too.
    advance(&mut state, 6, "wkf-dead");
    assert_eq!(task_state(&state, "b"), TaskState::Skipped);
    assert_eq!(task_state(&state, "c"), TaskState::Skipped);
    assert_eq!(state.get_workflow("wkf-dead").unwrap().state, WorkflowState::Failed);
}

#[test]
fn deep_cascade_requests_reevaluation() {
    let mut state = ClusterState::default();
    // A chain long enough that two passes cannot settle it once the head
    // dies: b, c, d, e all hang off the failed head in series.
    let wf = workflow(
        "wkf-chain",
        "chain",
        vec![
            ("a", shell_task_def("boom", &[])),
            ("b", shell_task_def("echo", &["a"])),
            ("c", shell_task_def("echo", &["b"])),
            ("d", shell_task_def("echo", &["c"])),
            ("e", shell_task_def("echo", &["d"])),
        ],
    );
    submit(&mut state, 1, wf);

    state.apply(&entry(2, Command::TaskAssign { task_id: tid("a"), node_id: "n2".into() }));
    state.apply(&entry(3, Command::TaskStarted { task_id: tid("a"), node_id: "n2".into() }));
    state.apply(&entry(
        4,
        Command::TaskDeadLetter { task_id: tid("a"), reason: "boom".into() },
    ));

    // Two passes skip b and c; the leader is asked to advance again for d, e.
    let actions = advance(&mut state, 5, "wkf-chain");
    assert_eq!(task_state(&state, "b"), TaskState::Skipped);
    assert_eq!(task_state(&state, "c"), TaskState::Skipped);
    assert_eq!(actions, vec![Action::AdvanceWorkflow { workflow_id: wid("wkf-chain") }]);

    let actions = advance(&mut state, 6, "wkf-chain");
    assert_eq!(task_state(&state, "d"), TaskState::Skipped);
    assert_eq!(task_state(&state, "e"), TaskState::Skipped);
    assert!(actions.is_empty() || actions == vec![Action::AdvanceWorkflow { workflow_id: wid("wkf-chain") }]);
    assert_eq!(state.get_workflow("wkf-chain").unwrap().state, WorkflowState::Failed);
}

#[test]
fn empty_workflow_completes_immediately() {
    let mut state = ClusterState::default();
    let wf = workflow("wkf-empty", "empty", vec![]);
    submit(&mut state, 1, wf);
    assert_eq!(state.get_workflow("wkf-empty").unwrap().state, WorkflowState::Completed);
}

#[test]
fn cyclic_workflow_fails_at_submit() {
    let mut state = ClusterState::default();
    let wf = workflow(
        "wkf-cycle",
        "cycle",
        vec![
            ("a", shell_task_def("echo a", &["b"])),
            ("b", shell_task_def("echo b", &["a"])),
        ],
    );
    submit(&mut state, 1, wf);
    assert_eq!(state.get_workflow("wkf-cycle").unwrap().state, WorkflowState::Failed);
}

#[test]
fn unknown_dependency_fails_at_submit() {
    let mut state = ClusterState::default();
    let wf = workflow(
        "wkf-dangling",
        "dangling",
        vec![("a", shell_task_def("echo a", &["ghost"]))],
    );
    submit(&mut state, 1, wf);
    assert_eq!(state.get_workflow("wkf-dangling").unwrap().state, WorkflowState::Failed);
}

#[test]
fn cancelled_member_fails_the_workflow() {
    let mut state = ClusterState::default();
    let wf = workflow("wkf-cxl", "cancelled", vec![("a", shell_task_def("echo a", &[]))]);
    submit(&mut state, 1, wf);

    let actions = state.apply(&entry(2, Command::TaskCancel { task_id: tid("a") }));
    assert_eq!(actions, vec![Action::AdvanceWorkflow { workflow_id: wid("wkf-cxl") }]);
    advance(&mut state, 3, "wkf-cxl");
    assert_eq!(state.get_workflow("wkf-cxl").unwrap().state, WorkflowState::Failed);
}

#[test]
fn diamond_fan_in_waits_for_both_parents() {
    let mut state = ClusterState::default();
    let wf = workflow(
        "wkf-dia",
        "diamond",
        vec![
            ("root", shell_task_def("echo", &[])),
            ("left", shell_task_def("echo", &["root"])),
            ("right", shell_task_def("echo", &["root"])),
            ("join", shell_task_def("echo", &["left", "right"])),
        ],
    );
    submit(&mut state, 1, wf);

    complete(&mut state, 2, "root", "", 0);
    advance(&mut state, 5, "wkf-dia");
    assert_eq!(task_state(&state, "left"), TaskState::Queued);
    assert_eq!(task_state(&state, "right"), TaskState::Queued);
    assert_eq!(task_state(&state, "join"), TaskState::Pending);

    complete(&mut state, 6, "left", "", 0);
    advance(&mut state, 9, "wkf-dia");
    // Right still outstanding: join keeps waiting.
    assert_eq!(task_state(&state, "join"), TaskState::Pending);

    complete(&mut state, 10, "right", "", 0);
    advance(&mut state, 13, "wkf-dia");
    assert_eq!(task_state(&state, "join"), TaskState::Queued);
}
