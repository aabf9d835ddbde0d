// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure placement logic: who can run a task, and who should.

use mesh_core::config::SchedulerTieBreak;
use mesh_core::{Node, NodeId, Task, TaskConstraints};
use std::collections::HashMap;

/// Cores currently free on a node, derived from its usage snapshot.
fn available_cores(node: &Node) -> u32 {
    let used = (node.resources.cpu_cores as f64 * node.resources.cpu_usage_pct / 100.0).ceil();
    node.resources.cpu_cores.saturating_sub(used as u32)
}

/// Fraction of memory in use; lower is a better placement.
fn memory_pressure(node: &Node) -> f64 {
    let total = node.resources.mem_total_bytes;
    if total == 0 {
        return 1.0;
    }
    1.0 - (node.resources.mem_available_bytes as f64 / total as f64)
}

/// Whether `node` can take `task` right now, after subtracting what this
/// placement pass already promised it (`debits`, in bytes).
fn fits(task: &Task, node: &Node, debits: &HashMap<NodeId, u64>) -> bool {
    if !node.status.schedulable() {
        return false;
    }
    let constraints = &task.constraints;
    if !constraints.allowed_nodes.is_empty() && !constraints.allowed_nodes.contains(&node.id) {
        return false;
    }
    if let Some(cores) = constraints.cpu_cores {
        if available_cores(node) < cores {
            return false;
        }
    }
    if let Some(mem) = constraints.mem_bytes {
        let debit = debits.get(&node.id).copied().unwrap_or(0);
        if node.resources.mem_available_bytes.saturating_sub(debit) < mem {
            return false;
        }
    }
    if constraints.gpu {
        if !node.resources.has_available_gpu() {
            return false;
        }
        // Someone is gaming on it; gpu-heavy work stays away.
        if node.resources.gaming_detected {
            return false;
        }
    }
    true
}

/// The candidate set for one task.
pub fn eligible_nodes<'a>(
    task: &Task,
    nodes: impl Iterator<Item = &'a Node>,
    debits: &HashMap<NodeId, u64>,
) -> Vec<&'a Node> {
    nodes.filter(|n| fits(task, n, debits)).collect()
}

/// Pick the best candidate: the configured primary criterion, then the
/// remaining ones, then node id so every leader ranks identically.
pub fn rank_candidates(
    mut candidates: Vec<&Node>,
    tie_break: SchedulerTieBreak,
) -> Option<NodeId> {
    candidates.sort_by(|a, b| {
        let by_cpu = a.resources.cpu_usage_pct.total_cmp(&b.resources.cpu_usage_pct);
        let by_mem = memory_pressure(a).total_cmp(&memory_pressure(b));
        let by_id = a.id.as_str().cmp(b.id.as_str());
        match tie_break {
            SchedulerTieBreak::Cpu => by_cpu.then(by_mem).then(by_id),
            SchedulerTieBreak::Memory => by_mem.then(by_cpu).then(by_id),
            SchedulerTieBreak::Lexicographic => by_id,
        }
    });
    candidates.first().map(|n| n.id)
}

/// Submit-time feasibility: could any known node *ever* satisfy these
/// constraints, ignoring current load? Used for the `no_eligible_nodes`
/// rejection; transient overload is not a rejection.
pub fn satisfiable_by_any<'a>(
    constraints: &TaskConstraints,
    nodes: impl Iterator<Item = &'a Node>,
) -> bool {
    if constraints.is_unconstrained() {
        return true;
    }
    nodes.into_iter().any(|node| {
        if !constraints.allowed_nodes.is_empty() && !constraints.allowed_nodes.contains(&node.id)
        {
            return false;
        }
        if let Some(cores) = constraints.cpu_cores {
            if node.resources.cpu_cores < cores {
                return false;
            }
        }
        if let Some(mem) = constraints.mem_bytes {
            if node.resources.mem_total_bytes < mem {
                return false;
            }
        }
        if constraints.gpu && node.resources.gpus.is_empty() {
            return false;
        }
        true
    })
}
