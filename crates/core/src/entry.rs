// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replicated log entries.
//!
//! A [`LogEntry`] is the unit of consensus: once replicated to a majority it
//! is committed, and every node applies it in index order. The [`Command`]
//! payload is the closed set of mutations the state machines recognize; its
//! serde tag is the wire-level entry kind.
//!
//! Timestamps that apply handlers need (created/assigned/completed times,
//! backoff gates) are carried inside the entry, assigned by the leader at
//! propose time, so apply is deterministic on every node and across replays.

use crate::id::{TaskId, WorkflowId};
use crate::node::{Node, NodeId};
use crate::resources::ResourceSnapshot;
use crate::task::{Task, TaskResult};
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};

pub type Term = u64;
pub type LogIndex = u64;

/// One record in the replicated log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonically increasing, assigned by the leader
    pub index: LogIndex,
    /// Election term the entry was proposed in
    pub term: Term,
    /// Leader wall clock at propose time (epoch ms)
    pub appended_at_ms: u64,
    #[serde(flatten)]
    pub command: Command,
}

/// The closed set of state-machine mutations.
///
/// Unknown kinds (from a newer binary mid rolling-update) deserialize to
/// [`Command::Unknown`] and are applied as a warn-logged no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    // === Membership ===
    NodeJoin { node: Node },
    NodeApprove { node_id: NodeId },
    NodeDrain { node_id: NodeId },
    NodeOffline { node_id: NodeId },
    NodeRemove { node_id: NodeId },
    NodeUpdateResources { node_id: NodeId, resources: ResourceSnapshot },

    // === Task lifecycle ===
    TaskSubmit { task: Task },
    TaskAssign { task_id: TaskId, node_id: NodeId },
    TaskStarted { task_id: TaskId, node_id: NodeId },
    TaskComplete { task_id: TaskId, result: TaskResult },
    TaskFailed {
        task_id: TaskId,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<TaskResult>,
    },
    TaskCancel { task_id: TaskId },
    TaskRetry { task_id: TaskId, attempt: u32, scheduled_after_ms: u64 },
    TaskDeadLetter { task_id: TaskId, reason: String },

    // === Workflow lifecycle ===
    /// Carries the member tasks pre-built by the leader (ids are assigned at
    /// propose time so apply stays deterministic).
    WorkflowSubmit { workflow: Workflow, tasks: Vec<Task> },
    WorkflowAdvance { workflow_id: WorkflowId },

    /// Entry kind this binary does not know; applied as a no-op.
    #[serde(other)]
    Unknown,
}

impl Command {
    /// The wire-level entry kind tag (matches the serde tag).
    pub fn kind(&self) -> &'static str {
        match self {
            Command::NodeJoin { .. } => "node_join",
            Command::NodeApprove { .. } => "node_approve",
            Command::NodeDrain { .. } => "node_drain",
            Command::NodeOffline { .. } => "node_offline",
            Command::NodeRemove { .. } => "node_remove",
            Command::NodeUpdateResources { .. } => "node_update_resources",
            Command::TaskSubmit { .. } => "task_submit",
            Command::TaskAssign { .. } => "task_assign",
            Command::TaskStarted { .. } => "task_started",
            Command::TaskComplete { .. } => "task_complete",
            Command::TaskFailed { .. } => "task_failed",
            Command::TaskCancel { .. } => "task_cancel",
            Command::TaskRetry { .. } => "task_retry",
            Command::TaskDeadLetter { .. } => "task_dead_letter",
            Command::WorkflowSubmit { .. } => "workflow_submit",
            Command::WorkflowAdvance { .. } => "workflow_advance",
            Command::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
