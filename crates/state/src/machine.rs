// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized cluster state and the apply entry point.

use crate::actions::Action;
use mesh_core::entry::{Command, LogEntry, LogIndex};
use mesh_core::workflow::DependencyEdge;
use mesh_core::{Node, NodeId, Task, TaskEvent, TaskId, TaskState, Workflow, WorkflowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Cap on per-task history; the oldest non-`submitted` events are trimmed.
pub(crate) const MAX_TASK_EVENTS: usize = 256;

/// Everything the replicated log materializes on each member.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    pub nodes: HashMap<NodeId, Node>,
    pub tasks: HashMap<TaskId, Task>,
    pub workflows: HashMap<WorkflowId, Workflow>,
    /// Dependency edges, flat per workflow (no in-memory object graph).
    #[serde(default)]
    pub edges: HashMap<WorkflowId, Vec<DependencyEdge>>,
    /// Append-only per-task history.
    #[serde(default)]
    pub task_events: HashMap<TaskId, Vec<TaskEvent>>,
    /// Index of the last applied entry; snapshot/replay boundary and
    /// double-apply guard.
    #[serde(default)]
    pub last_applied: LogIndex,
}

impl ClusterState {
    /// Apply one committed entry. Returns follow-up actions for the
    /// leader's driver. Re-applying an already-seen index is a no-op.
    pub fn apply(&mut self, entry: &LogEntry) -> Vec<Action> {
        if entry.index <= self.last_applied {
            return Vec::new();
        }
        self.last_applied = entry.index;

        match &entry.command {
            Command::NodeJoin { .. }
            | Command::NodeApprove { .. }
            | Command::NodeDrain { .. }
            | Command::NodeOffline { .. }
            | Command::NodeRemove { .. }
            | Command::NodeUpdateResources { .. } => crate::nodes::apply(self, entry),

            Command::TaskSubmit { .. }
            | Command::TaskAssign { .. }
            | Command::TaskStarted { .. }
            | Command::TaskComplete { .. }
            | Command::TaskFailed { .. }
            | Command::TaskCancel { .. }
            | Command::TaskRetry { .. }
            | Command::TaskDeadLetter { .. } => crate::tasks::apply(self, entry),

            Command::WorkflowSubmit { .. } | Command::WorkflowAdvance { .. } => {
                crate::workflows::apply(self, entry)
            }

            Command::Unknown => {
                warn!(index = entry.index, "unknown entry kind, applied as no-op");
                Vec::new()
            }
        }
    }

    // === Queries ===

    /// Get a task by ID or unique prefix (like git commit hashes).
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        find_by_prefix(&self.tasks, id)
    }

    /// Get a workflow by ID or unique prefix.
    pub fn get_workflow(&self, id: &str) -> Option<&Workflow> {
        find_by_prefix(&self.workflows, id)
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.status.schedulable())
    }

    /// Queued tasks whose backoff gate has passed, in placement order:
    /// priority descending, then submission time, then id for determinism.
    pub fn queued_tasks_ready_now(&self, now_ms: u64) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self.tasks.values().filter(|t| t.ready_at(now_ms)).collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at_ms.cmp(&b.created_at_ms))
                .then(a.id.as_str().cmp(b.id.as_str()))
        });
        ready
    }

    /// Earliest future `scheduled_after` among queued tasks, for the
    /// scheduler's wake-up timer.
    pub fn next_scheduled_after(&self, now_ms: u64) -> Option<u64> {
        self.tasks
            .values()
            .filter(|t| t.state == TaskState::Queued)
            .filter_map(|t| t.scheduled_after_ms)
            .filter(|at| *at > now_ms)
            .min()
    }

    /// Tasks occupying a node (assigned or running).
    pub fn tasks_on_node(&self, node_id: &NodeId) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.state.is_placed() && t.assigned_node.as_ref() == Some(node_id))
            .collect();
        tasks.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        tasks
    }

    pub fn tasks_in_state(&self, state: TaskState) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().filter(|t| t.state == state).collect();
        tasks.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        tasks
    }

    /// Member tasks of a workflow, keyed by task key.
    pub fn workflow_tasks(&self, workflow_id: &WorkflowId) -> HashMap<&str, &Task> {
        self.tasks
            .values()
            .filter(|t| t.workflow_id.as_ref() == Some(workflow_id))
            .filter_map(|t| t.task_key.as_deref().map(|k| (k, t)))
            .collect()
    }

    pub fn events_for(&self, task_id: &TaskId) -> &[TaskEvent] {
        self.task_events.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Record a task event in the same apply step as its transition.
    pub(crate) fn push_event(&mut self, event: TaskEvent) {
        let events = self.task_events.entry(event.task_id).or_default();
        if events.len() >= MAX_TASK_EVENTS {
            // Keep the submitted event at [0]; trim the oldest after it.
            events.remove(1);
        }
        events.push(event);
    }
}

/// Exact match first, then unique-prefix match.
pub(crate) fn find_by_prefix<'a, K, V>(map: &'a HashMap<K, V>, id: &str) -> Option<&'a V>
where
    K: std::borrow::Borrow<str> + std::cmp::Eq + std::hash::Hash,
{
    if let Some(v) = map.get(id) {
        return Some(v);
    }
    let mut matches = map.iter().filter(|(k, _)| (*k).borrow().starts_with(id));
    let first = matches.next()?;
    if matches.next().is_some() {
        return None; // ambiguous
    }
    Some(first.1)
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
