// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    pending = { TaskState::Pending, false },
    queued = { TaskState::Queued, false },
    assigned = { TaskState::Assigned, false },
    running = { TaskState::Running, false },
    completed = { TaskState::Completed, true },
    failed = { TaskState::Failed, true },
    cancelled = { TaskState::Cancelled, true },
    dead_letter = { TaskState::DeadLetter, true },
    skipped = { TaskState::Skipped, true },
)]
fn terminality(state: TaskState, terminal: bool) {
    assert_eq!(state.is_terminal(), terminal);
}

#[test]
fn placed_states_are_assigned_and_running() {
    assert!(TaskState::Assigned.is_placed());
    assert!(TaskState::Running.is_placed());
    assert!(!TaskState::Queued.is_placed());
    assert!(!TaskState::Completed.is_placed());
}

#[test]
fn spec_type_matches_tag() {
    let spec = TaskSpec::K8sJob {
        image: "busybox".into(),
        command: vec!["true".into()],
        namespace: None,
        env: HashMap::new(),
    };
    assert_eq!(spec.task_type(), TaskType::K8sJob);

    let json = serde_json::to_value(&spec).unwrap();
    assert_eq!(json["type"], "k8s_job");
}

#[test]
fn ready_at_honors_backoff_gate() {
    let task = Task::builder().build();
    assert!(task.ready_at(1_000_000));

    let gated = Task::builder().scheduled_after_ms(2_000_000u64).build();
    assert!(!gated.ready_at(1_999_999));
    assert!(gated.ready_at(2_000_000));

    let running = Task::builder().state(TaskState::Running).build();
    assert!(!running.ready_at(u64::MAX));
}

#[test]
fn unconstrained_detection() {
    assert!(TaskConstraints::default().is_unconstrained());

    let gpu = TaskConstraints { gpu: true, ..TaskConstraints::default() };
    assert!(!gpu.is_unconstrained());

    let pinned = TaskConstraints {
        allowed_nodes: vec![NodeId::from_string("n1")],
        ..TaskConstraints::default()
    };
    assert!(!pinned.is_unconstrained());
}

#[test]
fn task_serde_round_trip() {
    let task = Task::builder()
        .id("tsk-serde")
        .state(TaskState::Assigned)
        .assigned_node(NodeId::from_string("n3"))
        .assigned_at_ms(5u64)
        .build();
    let json = serde_json::to_string(&task).unwrap();
    let back: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(back, task);
}

#[test]
fn event_kind_display() {
    assert_eq!(TaskEventKind::DeadLettered.to_string(), "dead_lettered");
    assert_eq!(TaskEventKind::Submitted.to_string(), "submitted");
}
