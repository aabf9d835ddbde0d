// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow records: DAGs of named tasks with conditional edges.

use crate::id::WorkflowId;
use crate::retry::RetryPolicy;
use crate::task::{TaskConstraints, TaskSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Workflow lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Running,
    Completed,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WorkflowState::Running)
    }
}

crate::simple_display! {
    WorkflowState {
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

/// One named task inside a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDef {
    pub spec: TaskSpec,
    /// Keys of tasks that must reach a terminal state first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Edge condition applied to every incoming dependency edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TaskConstraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// What a submitter hands the leader: a named, ordered set of task
/// definitions. Order is preserved (`IndexMap`) so every node iterates
/// the DAG the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    pub name: String,
    pub tasks: IndexMap<String, TaskDef>,
    /// Seed values visible to edge conditions as `workflow.context.<key>`
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

/// A dependency edge, stored flat and keyed by workflow id.
///
/// `task_key` waits on `depends_on_key`; with no condition the edge is
/// satisfied iff the parent completed, otherwise the condition expression
/// decides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub workflow_id: WorkflowId,
    pub task_key: String,
    pub depends_on_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// A replicated workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub state: WorkflowState,
    pub definition: WorkflowDef,
    /// Evaluation context for edge conditions
    #[serde(default)]
    pub context: HashMap<String, String>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

impl Workflow {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
