// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Follow-up work computed by apply handlers.
//!
//! Every node computes the same actions from the same entry; only the
//! leader's driver acts on them, by proposing the corresponding entries
//! (or, for [`Action::CancelRunning`], sending the out-of-band cancel RPC).

use mesh_core::{NodeId, TaskId, WorkflowId};

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Propose `task_retry` with these exact values.
    RetryTask { task_id: TaskId, attempt: u32, scheduled_after_ms: u64 },
    /// Propose `task_dead_letter`.
    DeadLetterTask { task_id: TaskId, reason: String },
    /// Tell the executor on `node_id` to stop the task, best-effort.
    CancelRunning { task_id: TaskId, node_id: NodeId },
    /// Propose `workflow_advance` so every node re-evaluates the DAG.
    AdvanceWorkflow { workflow_id: WorkflowId },
}
