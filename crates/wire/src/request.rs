// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mesh_core::workflow::WorkflowDef;
use mesh_core::{NodeId, RequestId, RetryPolicy, TaskConstraints, TaskSpec, TaskState};
use serde::{Deserialize, Serialize};

/// Request from a submitter to the daemon.
///
/// Mutating requests must reach the leader; any node answers reads from its
/// local replica. A non-leader answers mutations with an `Error` response
/// carrying `not_leader` and the current leader hint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Health check ping
    Ping,

    /// Version handshake
    Hello { version: String },

    /// Submit a standalone task
    SubmitTask {
        spec: TaskSpec,
        #[serde(default)]
        priority: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constraints: Option<TaskConstraints>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry: Option<RetryPolicy>,
    },

    /// Submit a workflow DAG
    SubmitWorkflow { definition: WorkflowDef },

    /// Cancel a task (id or unique prefix)
    CancelTask { id: String },

    /// Single task status
    TaskStatus { id: String },

    /// Per-task event history
    TaskEvents { id: String },

    /// List tasks, optionally filtered by state
    ListTasks {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        state: Option<TaskState>,
    },

    /// List workflows
    ListWorkflows,

    /// Single workflow status with member task states
    WorkflowStatus { id: String },

    /// List cluster members
    ListNodes,

    /// Follow a running task's output stream
    Follow { id: String },

    /// List join requests awaiting operator approval (leader-only)
    ListJoinRequests,

    /// Approve a pending join request (leader-only)
    ApproveJoin { request_id: RequestId },

    /// Reject a pending join request (leader-only)
    RejectJoin { request_id: RequestId },

    /// Stop placing work on a node; running tasks finish
    DrainNode { id: NodeId },

    /// Remove an offline node from the directory
    RemoveNode { id: NodeId },

    /// Leader-orchestrated follower-by-follower binary swap
    RollingUpdate {
        #[serde(default)]
        dry_run: bool,
    },

    /// Daemon status
    Status,

    /// Request daemon shutdown
    Shutdown,
}
