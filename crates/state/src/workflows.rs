// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow apply handlers and the DAG evaluator.
//!
//! Evaluation is pure state-machine work: every node runs it on the same
//! committed `workflow_advance` entry and reaches the same conclusions.
//! The leader only gets involved again when a second evaluation pass still
//! changed something; then it proposes another advance so the cascade
//! continues under consensus.

use crate::actions::Action;
use crate::condition::{self, ConditionContext, ParentResult};
use crate::machine::ClusterState;
use crate::tasks;
use mesh_core::entry::{Command, LogEntry};
use mesh_core::workflow::{DependencyEdge, WorkflowDef};
use mesh_core::{TaskId, TaskState, Workflow, WorkflowId, WorkflowState};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

pub(crate) fn apply(state: &mut ClusterState, entry: &LogEntry) -> Vec<Action> {
    let at_ms = entry.appended_at_ms;
    match &entry.command {
        Command::WorkflowSubmit { workflow, tasks: members } => {
            if state.workflows.contains_key(&workflow.id) {
                return Vec::new();
            }
            let mut wf = workflow.clone();
            wf.created_at_ms = at_ms;

            if let Err(reason) = validate_dag(&wf.definition) {
                warn!(workflow = %wf.id, reason, "workflow rejected at apply");
                wf.state = WorkflowState::Failed;
                wf.finished_at_ms = Some(at_ms);
                state.workflows.insert(wf.id, wf);
                return Vec::new();
            }

            if wf.definition.tasks.is_empty() {
                wf.state = WorkflowState::Completed;
                wf.finished_at_ms = Some(at_ms);
                state.workflows.insert(wf.id, wf);
                return Vec::new();
            }

            wf.state = WorkflowState::Running;
            state.edges.insert(wf.id, build_edges(&wf.id, &wf.definition));

            for member in members {
                if state.tasks.contains_key(&member.id) {
                    continue;
                }
                let mut task = member.clone();
                task.state = TaskState::Pending;
                task.created_at_ms = at_ms;
                state.push_event(mesh_core::TaskEvent {
                    task_id: task.id,
                    kind: mesh_core::TaskEventKind::Submitted,
                    node_id: None,
                    detail: task.task_key.clone(),
                    at_ms,
                });
                state.tasks.insert(task.id, task);
            }

            let id = wf.id;
            info!(workflow = %id, tasks = members.len(), "workflow submitted");
            state.workflows.insert(id, wf);

            // Queue the roots right away; no second entry needed for that.
            evaluate(state, &id, at_ms);
            Vec::new()
        }

        Command::WorkflowAdvance { workflow_id } => {
            let Some(wf) = state.workflows.get(workflow_id) else {
                return Vec::new();
            };
            if wf.is_terminal() {
                return Vec::new();
            }
            let outcome = evaluate(state, workflow_id, at_ms);
            debug!(
                workflow = %workflow_id,
                ready = outcome.queued.len(),
                skipped = outcome.skipped.len(),
                "workflow advanced"
            );
            if outcome.needs_reevaluation {
                vec![Action::AdvanceWorkflow { workflow_id: *workflow_id }]
            } else {
                Vec::new()
            }
        }

        _ => Vec::new(),
    }
}

/// One evaluation round: up to two passes plus the terminal check.
pub(crate) struct EvalOutcome {
    pub queued: Vec<TaskId>,
    pub skipped: Vec<TaskId>,
    /// True when the second pass still changed tasks: the cascade is not
    /// provably settled, so the leader should advance again.
    pub needs_reevaluation: bool,
}

pub(crate) fn evaluate(
    state: &mut ClusterState,
    workflow_id: &WorkflowId,
    at_ms: u64,
) -> EvalOutcome {
    let mut outcome =
        EvalOutcome { queued: Vec::new(), skipped: Vec::new(), needs_reevaluation: false };

    let (first_queued, first_skipped) = evaluation_pass(state, workflow_id);
    transition(state, &first_queued, &first_skipped, at_ms);
    let first_changed = !first_queued.is_empty() || !first_skipped.is_empty();
    outcome.queued.extend(first_queued);
    outcome.skipped.extend(first_skipped);

    if first_changed {
        let (second_queued, second_skipped) = evaluation_pass(state, workflow_id);
        transition(state, &second_queued, &second_skipped, at_ms);
        outcome.needs_reevaluation = !second_queued.is_empty() || !second_skipped.is_empty();
        outcome.queued.extend(second_queued);
        outcome.skipped.extend(second_skipped);
    }

    finalize_if_terminal(state, workflow_id, at_ms);
    outcome
}

fn transition(state: &mut ClusterState, queued: &[TaskId], skipped: &[TaskId], at_ms: u64) {
    for id in queued {
        tasks::queue_task(state, *id);
    }
    for id in skipped {
        tasks::skip_task(state, *id, at_ms);
    }
}

/// Decide, without mutating, which pending members become ready or skipped.
fn evaluation_pass(state: &ClusterState, workflow_id: &WorkflowId) -> (Vec<TaskId>, Vec<TaskId>) {
    let Some(wf) = state.workflows.get(workflow_id) else {
        return (Vec::new(), Vec::new());
    };
    let members = state.workflow_tasks(workflow_id);
    let empty = Vec::new();
    let edges = state.edges.get(workflow_id).unwrap_or(&empty);

    // Parent-results map over terminal members only.
    let mut parents: HashMap<String, ParentResult> = HashMap::new();
    for (key, task) in &members {
        if task.is_terminal() {
            parents.insert(
                key.to_string(),
                ParentResult {
                    exit_code: task.result.as_ref().map(|r| r.exit_code as i64),
                    stdout: task.result.as_ref().map(|r| r.stdout.clone()).unwrap_or_default(),
                    stderr: task.result.as_ref().map(|r| r.stderr.clone()).unwrap_or_default(),
                    state: task.state.to_string(),
                },
            );
        }
    }
    let ctx = ConditionContext { parents: &parents, context: &wf.context };

    let mut queued = Vec::new();
    let mut skipped = Vec::new();
    for (key, task) in &members {
        if task.state != TaskState::Pending {
            continue;
        }
        let incoming: Vec<&DependencyEdge> =
            edges.iter().filter(|e| e.task_key == *key).collect();

        // Every predecessor must be terminal before the edges get a say.
        let all_parents_terminal = incoming.iter().all(|e| {
            members.get(e.depends_on_key.as_str()).map(|p| p.is_terminal()).unwrap_or(false)
        });
        if !all_parents_terminal {
            continue;
        }

        let satisfied = incoming.iter().all(|e| edge_satisfied(e, &members, &ctx));
        if satisfied {
            debug!(workflow = %workflow_id, task = key, "dependencies satisfied");
            queued.push(task.id);
        } else {
            debug!(workflow = %workflow_id, task = key, "edges unsatisfied, skipping");
            skipped.push(task.id);
        }
    }
    (queued, skipped)
}

fn edge_satisfied(
    edge: &DependencyEdge,
    members: &HashMap<&str, &mesh_core::Task>,
    ctx: &ConditionContext,
) -> bool {
    match &edge.condition {
        // Plain edge: satisfied iff the parent completed.
        None => members
            .get(edge.depends_on_key.as_str())
            .map(|p| p.state == TaskState::Completed)
            .unwrap_or(false),
        Some(expr) => condition::evaluate(expr, ctx),
    }
}

fn finalize_if_terminal(state: &mut ClusterState, workflow_id: &WorkflowId, at_ms: u64) {
    let (settled, any_failed) = {
        let members = state.workflow_tasks(workflow_id);
        let settled = !members.is_empty() && members.values().all(|t| t.is_terminal());
        let any_failed = members.values().any(|t| {
            matches!(t.state, TaskState::Failed | TaskState::DeadLetter | TaskState::Cancelled)
        });
        (settled, any_failed)
    };
    if !settled {
        return;
    }
    if let Some(wf) = state.workflows.get_mut(workflow_id) {
        if wf.is_terminal() {
            return;
        }
        wf.state = if any_failed { WorkflowState::Failed } else { WorkflowState::Completed };
        wf.finished_at_ms = Some(at_ms);
        info!(workflow = %workflow_id, state = %wf.state, "workflow finished");
    }
}

/// Structural validation at submit: known keys, unique keys, no cycles.
fn validate_dag(def: &WorkflowDef) -> Result<(), String> {
    for (key, task) in &def.tasks {
        for dep in &task.depends_on {
            if !def.tasks.contains_key(dep) {
                return Err(format!("task {key:?} depends on unknown task {dep:?}"));
            }
        }
    }

    // Kahn's algorithm; leftover nodes mean a cycle.
    let mut in_degree: HashMap<&str, usize> =
        def.tasks.iter().map(|(k, t)| (k.as_str(), t.depends_on.len())).collect();

    let mut ready: Vec<&str> =
        in_degree.iter().filter(|(_, d)| **d == 0).map(|(k, _)| *k).collect();
    let mut visited: HashSet<&str> = HashSet::new();
    while let Some(key) = ready.pop() {
        if !visited.insert(key) {
            continue;
        }
        for (candidate, task) in &def.tasks {
            if task.depends_on.iter().any(|d| d == key) {
                let d = in_degree.get_mut(candidate.as_str());
                if let Some(d) = d {
                    *d = d.saturating_sub(1);
                    if *d == 0 {
                        ready.push(candidate.as_str());
                    }
                }
            }
        }
    }
    if visited.len() != def.tasks.len() {
        return Err("dependency graph has a cycle".to_string());
    }
    Ok(())
}

/// Flatten a definition into stored edges; the dependent task's condition
/// is applied to each of its incoming edges.
fn build_edges(workflow_id: &WorkflowId, def: &WorkflowDef) -> Vec<DependencyEdge> {
    let mut edges = Vec::new();
    for (key, task) in &def.tasks {
        for dep in &task.depends_on {
            edges.push(DependencyEdge {
                workflow_id: *workflow_id,
                task_key: key.clone(),
                depends_on_key: dep.clone(),
                condition: task.condition.clone(),
            });
        }
    }
    edges
}

#[cfg(test)]
#[path = "workflows_tests.rs"]
mod tests;
