// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster member records.
//!
//! A [`Node`] is the replicated directory entry for one machine in the mesh.
//! It is created by a `node_join` log entry and mutated only by membership
//! entries applied through the state machine.

use crate::resources::ResourceSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

crate::define_id! {
    /// Stable identifier for a cluster member. Operator-assigned
    /// (e.g. "n1", "pxe-worker-07"), not generated.
    pub struct NodeId("nod-");
}

/// Tag that marks a member as short-lived: eligible for auto-approval and
/// time-based cleanup after going offline.
pub const EPHEMERAL_TAG: &str = "ephemeral";

/// Consensus role a node currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Leader,
    Follower,
    Candidate,
    /// Member that executes tasks but does not vote.
    Worker,
}

crate::simple_display! {
    Role {
        Leader => "leader",
        Follower => "follower",
        Candidate => "candidate",
        Worker => "worker",
    }
}

/// Membership lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Joined but awaiting operator (or policy) approval.
    PendingApproval,
    /// Approved and heartbeating; eligible for placement.
    Active,
    /// Being emptied; no new placements, running tasks finish.
    Draining,
    /// Missed heartbeats past the timeout, or drained dry.
    Offline,
}

impl NodeStatus {
    /// Placement is allowed only on active members.
    pub fn schedulable(&self) -> bool {
        matches!(self, NodeStatus::Active)
    }
}

crate::simple_display! {
    NodeStatus {
        PendingApproval => "pending_approval",
        Active => "active",
        Draining => "draining",
        Offline => "offline",
    }
}

/// A cluster member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    /// Reachable address on the underlay network
    pub address: String,
    pub port: u16,
    pub role: Role,
    pub status: NodeStatus,
    pub resources: ResourceSnapshot,
    /// Free-form tags; `ephemeral` is well-known
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Epoch ms when the node became active
    pub joined_at_ms: u64,
    /// Epoch ms of the most recent heartbeat the leader saw
    pub last_seen_ms: u64,
}

impl Node {
    pub fn is_ephemeral(&self) -> bool {
        self.tags.contains(EPHEMERAL_TAG)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// `host:port` dial string for the peer transport.
    pub fn dial_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

crate::builder! {
    pub struct NodeBuilder => Node {
        into {
            id: NodeId = "n1",
            hostname: String = "test-host",
            address: String = "127.0.0.1",
        }
        set {
            port: u16 = 7410,
            role: Role = Role::Follower,
            status: NodeStatus = NodeStatus::Active,
            resources: ResourceSnapshot = ResourceSnapshot {
                cpu_cores: 8,
                mem_total_bytes: 16 * 1024 * 1024 * 1024,
                mem_available_bytes: 8 * 1024 * 1024 * 1024,
                gpus: Vec::new(),
                disk_total_bytes: 512 * 1024 * 1024 * 1024,
                disk_available_bytes: 256 * 1024 * 1024 * 1024,
                cpu_usage_pct: 10.0,
                gaming_detected: false,
            },
            tags: BTreeSet<String> = BTreeSet::new(),
            joined_at_ms: u64 = 1_000_000,
            last_seen_ms: u64 = 1_000_000,
        }
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
