// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::types::{
    NodeSummary, OutputChannel, TaskDetail, TaskEventEntry, TaskSummary, UpdateReport,
    WorkflowDetail, WorkflowSummary,
};
use mesh_core::{ErrorKind, NodeId, TaskId, WorkflowId};
use serde::{Deserialize, Serialize};

/// Response from the daemon to a submitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success
    Ok,

    /// Health check response
    Pong,

    /// Version handshake response
    Hello { version: String },

    /// Task accepted and committed
    TaskSubmitted { task_id: TaskId },

    /// Workflow accepted and committed
    WorkflowSubmitted { workflow_id: WorkflowId },

    /// Single task details
    Task { task: Option<Box<TaskDetail>> },

    /// List of tasks
    Tasks { tasks: Vec<TaskSummary> },

    /// Per-task event history
    TaskEvents { events: Vec<TaskEventEntry> },

    /// List of workflows
    Workflows { workflows: Vec<WorkflowSummary> },

    /// Single workflow details
    Workflow { workflow: Option<Box<WorkflowDetail>> },

    /// List of cluster members
    Nodes { nodes: Vec<NodeSummary> },

    /// Joins awaiting approval
    JoinRequests { requests: Vec<crate::types::JoinRequestEntry> },

    /// One chunk of a followed task's output
    Output { task_id: TaskId, channel: OutputChannel, bytes: Vec<u8> },

    /// A followed stream ended (task reached a terminal state)
    OutputEnd { task_id: TaskId },

    /// Rolling update outcome
    UpdateReport { report: UpdateReport },

    /// Daemon status
    Status {
        node_id: NodeId,
        role: String,
        term: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        leader: Option<NodeId>,
        uptime_secs: u64,
        nodes_active: usize,
        tasks_running: usize,
        tasks_queued: usize,
    },

    /// Daemon is shutting down
    ShuttingDown,

    /// Error response with a machine-readable kind
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        leader_hint: Option<NodeId>,
    },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error { kind, message: message.into(), leader_hint: None }
    }

    pub fn not_leader(leader_hint: Option<NodeId>) -> Self {
        Response::Error {
            kind: ErrorKind::NotLeader,
            message: "this node is not the leader".into(),
            leader_hint,
        }
    }
}
