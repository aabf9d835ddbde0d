// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol DTOs: flat, serde-friendly views of the replicated entities.

use mesh_core::{
    Node, NodeId, NodeStatus, Task, TaskEvent, TaskId, TaskState, TaskType, Workflow, WorkflowId,
    WorkflowState,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use mesh_core::OutputChannel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub task_type: TaskType,
    pub state: TaskState,
    pub priority: i32,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_node: Option<NodeId>,
    pub created_at_ms: u64,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type,
            state: task.state,
            priority: task.priority,
            attempt: task.attempt,
            workflow_id: task.workflow_id,
            assigned_node: task.assigned_node,
            created_at_ms: task.created_at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub summary: TaskSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
}

impl From<&Task> for TaskDetail {
    fn from(task: &Task) -> Self {
        Self {
            summary: TaskSummary::from(task),
            task_key: task.task_key.clone(),
            error: task.error.clone(),
            exit_code: task.result.as_ref().map(|r| r.exit_code),
            scheduled_after_ms: task.scheduled_after_ms,
            started_at_ms: task.started_at_ms,
            completed_at_ms: task.completed_at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEventEntry {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at_ms: u64,
}

impl From<&TaskEvent> for TaskEventEntry {
    fn from(event: &TaskEvent) -> Self {
        Self {
            kind: event.kind.to_string(),
            node_id: event.node_id,
            detail: event.detail.clone(),
            at_ms: event.at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub state: WorkflowState,
    pub task_count: usize,
    pub created_at_ms: u64,
}

impl WorkflowSummary {
    pub fn from_workflow(wf: &Workflow) -> Self {
        Self {
            id: wf.id,
            name: wf.name.clone(),
            state: wf.state,
            task_count: wf.definition.tasks.len(),
            created_at_ms: wf.created_at_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDetail {
    #[serde(flatten)]
    pub summary: WorkflowSummary,
    /// Task key → current state, in definition order semantics.
    pub tasks: HashMap<String, TaskState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: NodeId,
    pub hostname: String,
    pub address: String,
    pub status: NodeStatus,
    pub tags: Vec<String>,
    pub cpu_cores: u32,
    pub mem_available_bytes: u64,
    pub cpu_usage_pct: f64,
    pub gpus: usize,
    pub last_seen_ms: u64,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id,
            hostname: node.hostname.clone(),
            address: node.dial_addr(),
            status: node.status,
            tags: node.tags.iter().cloned().collect(),
            cpu_cores: node.resources.cpu_cores,
            mem_available_bytes: node.resources.mem_available_bytes,
            cpu_usage_pct: node.resources.cpu_usage_pct,
            gpus: node.resources.gpus.len(),
            last_seen_ms: node.last_seen_ms,
        }
    }
}

/// A join awaiting operator approval on the leader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequestEntry {
    pub request_id: mesh_core::RequestId,
    pub node_id: NodeId,
    pub hostname: String,
    pub tags: Vec<String>,
}

/// Outcome of a rolling update run (or dry run).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub dry_run: bool,
    /// Nodes now on the new binary.
    pub updated: Vec<NodeId>,
    /// Nodes that failed to rejoin and were rolled back.
    pub rolled_back: Vec<NodeId>,
    /// Nodes not attempted (preflight failure or abort).
    pub skipped: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
