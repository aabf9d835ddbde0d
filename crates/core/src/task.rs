// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task records and the task state machine vocabulary.
//!
//! The legal state transitions (driven only by applied log entries):
//!
//! ```text
//! created  ──task_submit (no workflow)──▶ queued
//! created  ──task_submit (in workflow)──▶ pending
//! pending  ──workflow_advance──▶ queued | skipped
//! queued   ──task_assign──▶ assigned ──task_started──▶ running
//! running  ──task_complete──▶ completed
//! running  ──task_failed──▶ (task_retry ▶ queued) | (task_dead_letter ▶ dead_letter)
//! queued|assigned|running ──task_cancel──▶ cancelled
//! ```

use crate::id::{TaskId, WorkflowId};
use crate::node::NodeId;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which executor adapter runs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Shell,
    Container,
    K8sJob,
    Subagent,
}

crate::simple_display! {
    TaskType {
        Shell => "shell",
        Container => "container",
        K8sJob => "k8s_job",
        Subagent => "subagent",
    }
}

/// Type-specific launch payload; the variant tag must match [`TaskType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskSpec {
    Shell {
        command: String,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    Container {
        image: String,
        #[serde(default)]
        command: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    K8sJob {
        image: String,
        #[serde(default)]
        command: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Subagent {
        agent: String,
        prompt: String,
        #[serde(default)]
        vars: HashMap<String, String>,
    },
}

impl TaskSpec {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskSpec::Shell { .. } => TaskType::Shell,
            TaskSpec::Container { .. } => TaskType::Container,
            TaskSpec::K8sJob { .. } => TaskType::K8sJob,
            TaskSpec::Subagent { .. } => TaskType::Subagent,
        }
    }
}

/// Placement requirements checked by the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskConstraints {
    /// Minimum free CPU cores
    pub cpu_cores: Option<u32>,
    /// Minimum available memory in bytes
    pub mem_bytes: Option<u64>,
    /// Requires a free GPU
    pub gpu: bool,
    /// Restrict placement to these node ids (empty = anywhere)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_nodes: Vec<NodeId>,
}

impl TaskConstraints {
    pub fn is_unconstrained(&self) -> bool {
        self.cpu_cores.is_none() && self.mem_bytes.is_none() && !self.gpu
            && self.allowed_nodes.is_empty()
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// In a workflow, waiting on dependencies
    Pending,
    /// Ready for placement
    Queued,
    /// Placed on a node, dispatch in flight
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    DeadLetter,
    /// Workflow edge condition not met, or upstream failed
    Skipped,
}

impl TaskState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::Failed
                | TaskState::Cancelled
                | TaskState::DeadLetter
                | TaskState::Skipped
        )
    }

    /// States in which the task occupies a node.
    pub fn is_placed(&self) -> bool {
        matches!(self, TaskState::Assigned | TaskState::Running)
    }
}

crate::simple_display! {
    TaskState {
        Pending => "pending",
        Queued => "queued",
        Assigned => "assigned",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
        DeadLetter => "dead_letter",
        Skipped => "skipped",
    }
}

/// Which side of a task's output stream a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputChannel {
    Stdout,
    Stderr,
    /// Executor status lines (never dropped under backpressure).
    Status,
}

crate::simple_display! {
    OutputChannel {
        Stdout => "stdout",
        Stderr => "stderr",
        Status => "status",
    }
}

/// Captured outcome of an execution attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Set when the task belongs to a workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    /// Unique key within the owning workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_key: Option<String>,
    pub task_type: TaskType,
    pub state: TaskState,
    /// Higher wins
    #[serde(default)]
    pub priority: i32,
    pub spec: TaskSpec,
    #[serde(default)]
    pub constraints: TaskConstraints,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Execution attempts so far (0 before the first failure)
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_node: Option<NodeId>,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dead_lettered_at_ms: Option<u64>,
    /// Gate for retried tasks: invisible to the scheduler until this passes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_after_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// A queued task is visible to the scheduler once its backoff gate passed.
    pub fn ready_at(&self, now_ms: u64) -> bool {
        self.state == TaskState::Queued
            && self.scheduled_after_ms.map(|t| t <= now_ms).unwrap_or(true)
    }
}

/// What happened to a task, kept as an append-only history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Submitted,
    Assigned,
    Started,
    Completed,
    Failed,
    Cancelled,
    Retried,
    DeadLettered,
    Skipped,
}

crate::simple_display! {
    TaskEventKind {
        Submitted => "submitted",
        Assigned => "assigned",
        Started => "started",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
        Retried => "retried",
        DeadLettered => "dead_lettered",
        Skipped => "skipped",
    }
}

/// One history entry; written in the same apply step as the transition it records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskEventKind,
    /// Node that originated the transition (assigned node, or leader for
    /// scheduling decisions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at_ms: u64,
}

crate::builder! {
    pub struct TaskBuilder => Task {
        into {
            id: TaskId = "tsk-test1",
        }
        set {
            task_type: TaskType = TaskType::Shell,
            state: TaskState = TaskState::Queued,
            priority: i32 = 0,
            spec: TaskSpec = TaskSpec::Shell {
                command: "true".into(),
                env: HashMap::new(),
                cwd: None,
            },
            constraints: TaskConstraints = TaskConstraints::default(),
            retry: RetryPolicy = RetryPolicy::default(),
            attempt: u32 = 0,
            created_at_ms: u64 = 1_000_000,
        }
        option {
            workflow_id: WorkflowId = None,
            task_key: String = None,
            assigned_node: NodeId = None,
            assigned_at_ms: u64 = None,
            started_at_ms: u64 = None,
            completed_at_ms: u64 = None,
            dead_lettered_at_ms: u64 = None,
            scheduled_after_ms: u64 = None,
            error: String = None,
            result: TaskResult = None,
        }
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
