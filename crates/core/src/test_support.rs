// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for tests in this crate and downstream crates
//! (enabled via the `test-support` feature).

use crate::entry::{Command, LogEntry};
use crate::node::Node;
use crate::task::{Task, TaskSpec};
use crate::workflow::{TaskDef, Workflow, WorkflowDef, WorkflowState};
use crate::WorkflowId;
use indexmap::IndexMap;
use std::collections::HashMap;

/// Wrap a command in a log entry with the given index (term 1).
pub fn entry(index: u64, command: Command) -> LogEntry {
    LogEntry { index, term: 1, appended_at_ms: 1_000_000 + index, command }
}

/// Wrap a command in a log entry with an explicit timestamp.
pub fn entry_at(index: u64, appended_at_ms: u64, command: Command) -> LogEntry {
    LogEntry { index, term: 1, appended_at_ms, command }
}

/// A shell task definition for workflow construction.
pub fn shell_task_def(command: &str, depends_on: &[&str]) -> TaskDef {
    TaskDef {
        spec: TaskSpec::Shell { command: command.into(), env: HashMap::new(), cwd: None },
        depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
        condition: None,
        priority: 0,
        constraints: None,
        retry: None,
    }
}

/// A shell task definition with a condition on its incoming edges.
pub fn conditional_task_def(command: &str, depends_on: &[&str], condition: &str) -> TaskDef {
    TaskDef { condition: Some(condition.into()), ..shell_task_def(command, depends_on) }
}

/// Assemble a workflow record from `(key, def)` pairs.
pub fn workflow(id: &str, name: &str, tasks: Vec<(&str, TaskDef)>) -> Workflow {
    let mut map = IndexMap::new();
    for (key, def) in tasks {
        map.insert(key.to_string(), def);
    }
    Workflow {
        id: WorkflowId::from_string(id),
        name: name.into(),
        state: WorkflowState::Running,
        definition: WorkflowDef { name: name.into(), tasks: map, context: HashMap::new() },
        context: HashMap::new(),
        created_at_ms: 1_000_000,
        finished_at_ms: None,
    }
}

/// Shorthand for a standalone queued shell task.
pub fn shell_task(id: &str) -> Task {
    Task::builder().id(id).build()
}

/// Shorthand for an active cluster node.
pub fn active_node(id: &str) -> Node {
    Node::builder().id(id).build()
}
