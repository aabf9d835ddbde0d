// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task lifecycle apply handlers.
//!
//! Transitions follow the DFA in the crate docs; a terminal task never
//! moves again, with one deliberate exception: `task_retry` revives a task
//! the retry machinery just failed. Handlers that receive an entry for a
//! state the DFA does not allow log and no-op; that is the idempotence
//! story for crash replay.

use crate::actions::Action;
use crate::machine::ClusterState;
use mesh_core::entry::{Command, LogEntry};
use mesh_core::{TaskEvent, TaskEventKind, TaskState};
use tracing::{debug, warn};

pub(crate) fn apply(state: &mut ClusterState, entry: &LogEntry) -> Vec<Action> {
    let at_ms = entry.appended_at_ms;
    match &entry.command {
        Command::TaskSubmit { task } => {
            if state.tasks.contains_key(&task.id) {
                return Vec::new();
            }
            let mut task = task.clone();
            task.created_at_ms = at_ms;
            task.state =
                if task.workflow_id.is_some() { TaskState::Pending } else { TaskState::Queued };
            debug!(task = %task.id, state = %task.state, "task submitted");
            state.push_event(TaskEvent {
                task_id: task.id,
                kind: TaskEventKind::Submitted,
                node_id: None,
                detail: None,
                at_ms,
            });
            state.tasks.insert(task.id, task);
            Vec::new()
        }

        Command::TaskAssign { task_id, node_id } => {
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Vec::new();
            };
            if task.state != TaskState::Queued {
                debug!(task = %task_id, state = %task.state, "assign ignored");
                return Vec::new();
            }
            task.state = TaskState::Assigned;
            task.assigned_node = Some(*node_id);
            task.assigned_at_ms = Some(at_ms);
            state.push_event(TaskEvent {
                task_id: *task_id,
                kind: TaskEventKind::Assigned,
                node_id: Some(*node_id),
                detail: None,
                at_ms,
            });
            Vec::new()
        }

        Command::TaskStarted { task_id, node_id } => {
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Vec::new();
            };
            if task.state != TaskState::Assigned {
                return Vec::new();
            }
            task.state = TaskState::Running;
            task.started_at_ms = Some(at_ms);
            state.push_event(TaskEvent {
                task_id: *task_id,
                kind: TaskEventKind::Started,
                node_id: Some(*node_id),
                detail: None,
                at_ms,
            });
            Vec::new()
        }

        Command::TaskComplete { task_id, result } => {
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Vec::new();
            };
            if !matches!(task.state, TaskState::Running | TaskState::Assigned) {
                return Vec::new();
            }
            task.state = TaskState::Completed;
            task.completed_at_ms = Some(at_ms);
            task.result = Some(result.clone());
            task.error = None;
            let node_id = task.assigned_node.take();
            let workflow_id = task.workflow_id;
            state.push_event(TaskEvent {
                task_id: *task_id,
                kind: TaskEventKind::Completed,
                node_id,
                detail: Some(format!("exit {}", result.exit_code)),
                at_ms,
            });
            match workflow_id {
                Some(workflow_id) => vec![Action::AdvanceWorkflow { workflow_id }],
                None => Vec::new(),
            }
        }

        Command::TaskFailed { task_id, error, result } => {
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Vec::new();
            };
            if !matches!(task.state, TaskState::Running | TaskState::Assigned) {
                return Vec::new();
            }
            task.state = TaskState::Failed;
            task.error = Some(error.clone());
            task.result = result.clone();
            let node_id = task.assigned_node.take();
            state.push_event(TaskEvent {
                task_id: *task_id,
                kind: TaskEventKind::Failed,
                node_id,
                detail: Some(error.clone()),
                at_ms,
            });

            // The leader turns this into task_retry or task_dead_letter;
            // the failure itself commits either way.
            let task = &state.tasks[task_id];
            if task.retry.can_retry(task.attempt) {
                vec![Action::RetryTask {
                    task_id: *task_id,
                    attempt: task.attempt + 1,
                    scheduled_after_ms: at_ms + task.retry.backoff_for(task.attempt),
                }]
            } else if !task.retry.retryable {
                vec![Action::DeadLetterTask { task_id: *task_id, reason: error.clone() }]
            } else {
                vec![Action::DeadLetterTask {
                    task_id: *task_id,
                    reason: format!(
                        "Max retries ({}) exceeded: {}",
                        task.retry.max_retries, error
                    ),
                }]
            }
        }

        Command::TaskCancel { task_id } => {
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Vec::new();
            };
            if !matches!(
                task.state,
                TaskState::Queued | TaskState::Assigned | TaskState::Running
            ) {
                debug!(task = %task_id, state = %task.state, "cancel ignored");
                return Vec::new();
            }
            let was_placed = task.state.is_placed();
            let node_id = task.assigned_node.take();
            task.state = TaskState::Cancelled;
            task.completed_at_ms = Some(at_ms);
            let workflow_id = task.workflow_id;
            state.push_event(TaskEvent {
                task_id: *task_id,
                kind: TaskEventKind::Cancelled,
                node_id,
                detail: None,
                at_ms,
            });

            let mut actions = Vec::new();
            if was_placed {
                if let Some(node_id) = node_id {
                    actions.push(Action::CancelRunning { task_id: *task_id, node_id });
                }
            }
            if let Some(workflow_id) = workflow_id {
                actions.push(Action::AdvanceWorkflow { workflow_id });
            }
            actions
        }

        Command::TaskRetry { task_id, attempt, scheduled_after_ms } => {
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Vec::new();
            };
            // Revives a just-failed task, or re-queues one stranded by a
            // node loss. Anything else (completed, cancelled...) stays put.
            if !matches!(
                task.state,
                TaskState::Failed | TaskState::Assigned | TaskState::Running
            ) {
                warn!(task = %task_id, state = %task.state, "retry ignored");
                return Vec::new();
            }
            task.state = TaskState::Queued;
            task.attempt = *attempt;
            task.assigned_node = None;
            task.assigned_at_ms = None;
            task.started_at_ms = None;
            task.error = None;
            task.result = None;
            task.scheduled_after_ms = Some(*scheduled_after_ms);
            state.push_event(TaskEvent {
                task_id: *task_id,
                kind: TaskEventKind::Retried,
                node_id: None,
                detail: Some(format!("attempt {}", attempt)),
                at_ms,
            });
            Vec::new()
        }

        Command::TaskDeadLetter { task_id, reason } => {
            let Some(task) = state.tasks.get_mut(task_id) else {
                return Vec::new();
            };
            if task.state.is_terminal() && task.state != TaskState::Failed {
                return Vec::new();
            }
            task.state = TaskState::DeadLetter;
            task.dead_lettered_at_ms = Some(at_ms);
            task.error = Some(reason.clone());
            task.assigned_node = None;
            let workflow_id = task.workflow_id;
            state.push_event(TaskEvent {
                task_id: *task_id,
                kind: TaskEventKind::DeadLettered,
                node_id: None,
                detail: Some(reason.clone()),
                at_ms,
            });
            match workflow_id {
                Some(workflow_id) => vec![Action::AdvanceWorkflow { workflow_id }],
                None => Vec::new(),
            }
        }

        _ => Vec::new(),
    }
}

/// Mark a pending workflow member skipped (used by the workflow engine in
/// the same apply step).
pub(crate) fn skip_task(state: &mut ClusterState, task_id: mesh_core::TaskId, at_ms: u64) {
    if let Some(task) = state.tasks.get_mut(&task_id) {
        if task.state != TaskState::Pending {
            return;
        }
        task.state = TaskState::Skipped;
        task.completed_at_ms = Some(at_ms);
        state.push_event(TaskEvent {
            task_id,
            kind: TaskEventKind::Skipped,
            node_id: None,
            detail: None,
            at_ms,
        });
    }
}

/// Move a pending workflow member to queued (dependencies satisfied).
pub(crate) fn queue_task(state: &mut ClusterState, task_id: mesh_core::TaskId) {
    if let Some(task) = state.tasks.get_mut(&task_id) {
        if task.state == TaskState::Pending {
            task.state = TaskState::Queued;
        }
    }
}

/// Re-validate the placement invariant after any apply (debug aid).
#[cfg(test)]
pub(crate) fn placement_invariant_holds(task: &mesh_core::Task) -> bool {
    task.state.is_placed() == task.assigned_node.is_some()
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
