// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Membership apply handlers.
//!
//! All membership mutations arrive as committed entries; there is no
//! out-of-band path. Handlers tolerate re-application (crash replay) by
//! checking the current status before transitioning.

use crate::actions::Action;
use crate::machine::ClusterState;
use mesh_core::entry::{Command, LogEntry};
use mesh_core::NodeStatus;
use tracing::{debug, info};

pub(crate) fn apply(state: &mut ClusterState, entry: &LogEntry) -> Vec<Action> {
    match &entry.command {
        Command::NodeJoin { node } => {
            match state.nodes.get_mut(&node.id) {
                // Re-join of a known node (PXE hosts cycle): refresh the
                // reachable address and capacity, keep the lifecycle status.
                Some(existing) => {
                    existing.hostname = node.hostname.clone();
                    existing.address = node.address.clone();
                    existing.port = node.port;
                    existing.resources = node.resources.clone();
                    existing.tags = node.tags.clone();
                    existing.last_seen_ms = entry.appended_at_ms;
                }
                None => {
                    let mut node = node.clone();
                    node.status = NodeStatus::PendingApproval;
                    node.last_seen_ms = entry.appended_at_ms;
                    info!(node = %node.id, host = %node.hostname, "node joined, pending approval");
                    state.nodes.insert(node.id, node);
                }
            }
            Vec::new()
        }

        Command::NodeApprove { node_id } => {
            if let Some(node) = state.nodes.get_mut(node_id) {
                if node.status == NodeStatus::PendingApproval {
                    node.status = NodeStatus::Active;
                    node.joined_at_ms = entry.appended_at_ms;
                    info!(node = %node_id, "node approved, now active");
                }
                // Already active: double-approve is a no-op.
            }
            Vec::new()
        }

        Command::NodeDrain { node_id } => {
            if let Some(node) = state.nodes.get_mut(node_id) {
                if node.status == NodeStatus::Active {
                    node.status = NodeStatus::Draining;
                    info!(node = %node_id, "node draining");
                }
            }
            Vec::new()
        }

        Command::NodeOffline { node_id } => {
            let Some(node) = state.nodes.get_mut(node_id) else {
                return Vec::new();
            };
            if node.status == NodeStatus::Offline {
                return Vec::new();
            }
            node.status = NodeStatus::Offline;
            info!(node = %node_id, "node offline");

            // Work stranded on the node: node loss counts as one attempt.
            let mut actions = Vec::new();
            let mut stranded: Vec<_> = state
                .tasks
                .values()
                .filter(|t| t.state.is_placed() && t.assigned_node.as_ref() == Some(node_id))
                .collect();
            stranded.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
            for task in stranded {
                if task.retry.can_retry(task.attempt) {
                    actions.push(Action::RetryTask {
                        task_id: task.id,
                        attempt: task.attempt + 1,
                        scheduled_after_ms: entry.appended_at_ms
                            + task.retry.backoff_for(task.attempt),
                    });
                } else {
                    actions.push(Action::DeadLetterTask {
                        task_id: task.id,
                        reason: format!("node {} went offline", node_id),
                    });
                }
            }
            actions
        }

        Command::NodeRemove { node_id } => {
            if state.nodes.remove(node_id).is_some() {
                info!(node = %node_id, "node removed");
            }
            Vec::new()
        }

        Command::NodeUpdateResources { node_id, resources } => {
            if let Some(node) = state.nodes.get_mut(node_id) {
                node.resources = resources.clone();
                node.last_seen_ms = entry.appended_at_ms;
                // A refreshed heartbeat brings an offline node back.
                if node.status == NodeStatus::Offline {
                    node.status = NodeStatus::Active;
                    info!(node = %node_id, "node back online");
                } else {
                    debug!(node = %node_id, "resources updated");
                }
            }
            Vec::new()
        }

        _ => Vec::new(),
    }
}

#[cfg(test)]
#[path = "nodes_tests.rs"]
mod tests;
