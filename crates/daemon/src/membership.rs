// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Membership manager: join/approval workflow, heartbeat-driven failure
//! detection, draining, and ephemeral cleanup.
//!
//! Every lifecycle change flows through the replicated log; this module
//! only decides *when* to propose. The pending-approval table is the one
//! leader-local piece of state, discarded on leadership change.

use mesh_core::entry::Command;
use mesh_core::{
    Clock, ClusterConfig, Node, NodeId, NodeStatus, RequestId, ResourceSnapshot,
};
use mesh_raft::RaftHandle;
use mesh_state::ClusterState;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How often the leader checks `last_seen` against the offline threshold.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("unknown join request {0}")]
    NotFound(RequestId),
    #[error("consensus error: {0}")]
    Propose(#[from] mesh_raft::ProposeError),
}

/// Supplies the local node's resource snapshot for heartbeats. Actual
/// sampling (CPU/GPU/memory probing) is an external concern; the daemon
/// ships with a static implementation fed from config or tests.
pub trait ResourceSampler: Send + Sync + 'static {
    fn sample(&self) -> ResourceSnapshot;
}

pub struct StaticSampler(pub ResourceSnapshot);

impl ResourceSampler for StaticSampler {
    fn sample(&self) -> ResourceSnapshot {
        self.0.clone()
    }
}

pub struct MembershipManager<C: Clock> {
    config: Arc<ClusterConfig>,
    raft: RaftHandle,
    state: Arc<RwLock<ClusterState>>,
    clock: C,
    /// Config-seeded peers are pre-trusted: a seed's join never waits for
    /// an operator.
    trusted_seeds: Vec<NodeId>,
    pending: Mutex<HashMap<RequestId, Node>>,
}

impl<C: Clock> MembershipManager<C> {
    pub fn new(
        config: Arc<ClusterConfig>,
        raft: RaftHandle,
        state: Arc<RwLock<ClusterState>>,
        clock: C,
    ) -> Self {
        let trusted_seeds = config
            .peers
            .iter()
            .filter_map(|p| ClusterConfig::parse_peer(p))
            .map(|(id, _)| id)
            .collect();
        Self { config, raft, state, clock, trusted_seeds, pending: Mutex::new(HashMap::new()) }
    }

    /// Leader-side join handling. Auto-approved classes commit
    /// `node_join` + `node_approve` back to back; everything else lands in
    /// the pending table awaiting an operator.
    pub async fn handle_join(&self, node: Node) -> Result<(RequestId, &'static str), ApprovalError> {
        let request_id = RequestId::new();
        let trusted =
            node.id == self.config.node_id || self.trusted_seeds.contains(&node.id);
        if trusted || self.config.auto_approves(&node.tags) {
            info!(node = %node.id, "auto-approving join");
            let node_id = node.id;
            self.raft.propose(Command::NodeJoin { node }).await?;
            self.raft.propose(Command::NodeApprove { node_id }).await?;
            return Ok((request_id, "approved"));
        }

        warn!(node = %node.id, request = %request_id, "join requires operator approval");
        self.pending.lock().insert(request_id, node);
        Ok((request_id, "pending"))
    }

    /// Approve a pending request: the node record becomes two committed
    /// entries and leaves the table.
    pub async fn approve(&self, request_id: RequestId) -> Result<NodeId, ApprovalError> {
        let node = self
            .pending
            .lock()
            .remove(&request_id)
            .ok_or(ApprovalError::NotFound(request_id))?;
        let node_id = node.id;
        self.raft.propose(Command::NodeJoin { node }).await?;
        self.raft.propose(Command::NodeApprove { node_id }).await?;
        info!(node = %node_id, request = %request_id, "join approved");
        Ok(node_id)
    }

    /// Reject (discard) a pending request.
    pub fn reject(&self, request_id: RequestId) -> bool {
        let removed = self.pending.lock().remove(&request_id);
        if let Some(node) = &removed {
            info!(node = %node.id, request = %request_id, "join rejected");
        }
        removed.is_some()
    }

    pub fn pending_requests(&self) -> Vec<(RequestId, Node)> {
        let mut requests: Vec<(RequestId, Node)> =
            self.pending.lock().iter().map(|(id, node)| (*id, node.clone())).collect();
        requests.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        requests
    }

    /// Leader-side heartbeat intake: refresh the member's snapshot through
    /// the log. An offline member's refresh doubles as its revival.
    pub async fn on_heartbeat(&self, from: NodeId, resources: ResourceSnapshot) {
        let known = self.state.read().nodes.contains_key(&from);
        if !known {
            debug!(node = %from, "heartbeat from unknown node ignored");
            return;
        }
        if let Err(e) = self
            .raft
            .propose(Command::NodeUpdateResources { node_id: from, resources })
            .await
        {
            debug!(node = %from, error = %e, "heartbeat proposal failed");
        }
    }

    /// Leader-side failure detector and drain watcher. Runs forever;
    /// no-ops while this node is not the leader.
    pub async fn run_monitor(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.raft.is_leader() {
                continue;
            }
            let now = self.clock.epoch_ms();
            let timeout = self.config.heartbeat_timeout_ms;

            let mut to_offline: Vec<NodeId> = Vec::new();
            {
                let state = self.state.read();
                for node in state.nodes.values() {
                    match node.status {
                        NodeStatus::Active if now.saturating_sub(node.last_seen_ms) > timeout => {
                            warn!(node = %node.id, "heartbeat timeout, marking offline");
                            to_offline.push(node.id);
                        }
                        NodeStatus::Draining => {
                            let timed_out = now.saturating_sub(node.last_seen_ms) > timeout;
                            let dry = state.tasks_on_node(&node.id).is_empty();
                            if dry || timed_out {
                                info!(node = %node.id, dry, "draining node going offline");
                                to_offline.push(node.id);
                            }
                        }
                        _ => {}
                    }
                }
            }
            for node_id in to_offline {
                if let Err(e) = self.raft.propose(Command::NodeOffline { node_id }).await {
                    debug!(node = %node_id, error = %e, "offline proposal failed");
                }
            }
        }
    }

    /// Leader-side periodic sweep removing long-offline ephemerals.
    pub async fn run_ephemeral_sweep(self: Arc<Self>) {
        let interval = Duration::from_millis(self.config.ephemeral_sweep_interval_ms.max(1000));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if !self.raft.is_leader() {
                continue;
            }
            let now = self.clock.epoch_ms();
            let ttl = self.config.ephemeral_cleanup_ttl_ms;

            let expired: Vec<NodeId> = {
                let state = self.state.read();
                state
                    .nodes
                    .values()
                    .filter(|n| {
                        n.status == NodeStatus::Offline
                            && n.is_ephemeral()
                            && now.saturating_sub(n.last_seen_ms) > ttl
                    })
                    .map(|n| n.id)
                    .collect()
            };
            for node_id in expired {
                info!(node = %node_id, "removing expired ephemeral node");
                if let Err(e) = self.raft.propose(Command::NodeRemove { node_id }).await {
                    debug!(node = %node_id, error = %e, "remove proposal failed");
                }
            }
        }
    }

    /// Compute which nodes should vote: every member whose declared role
    /// is not `worker`, plus this node itself. Pushed into the consensus
    /// driver whenever membership entries commit.
    pub fn voting_set(state: &ClusterState, self_id: NodeId) -> Vec<NodeId> {
        let mut voters: Vec<NodeId> = state
            .nodes
            .values()
            .filter(|n| n.role != mesh_core::Role::Worker)
            .filter(|n| !matches!(n.status, NodeStatus::PendingApproval))
            .map(|n| n.id)
            .collect();
        if !voters.contains(&self_id) {
            voters.push(self_id);
        }
        voters.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        voters
    }
}

/// Follower-side reporter: ship a resource snapshot to the current leader
/// on the configured cadence.
pub async fn run_heartbeat_reporter(
    config: Arc<ClusterConfig>,
    raft: RaftHandle,
    peers: crate::transport::PeerPool,
    sampler: Arc<dyn ResourceSampler>,
) {
    let interval = Duration::from_millis(config.node_heartbeat_interval_ms.max(100));
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(leader) = raft.current_leader() else {
            continue;
        };
        let msg = crate::transport::PeerMessage::Heartbeat {
            resources: sampler.sample(),
            last_known_term: raft.term(),
        };
        peers.send(&leader, msg);
    }
}

#[cfg(test)]
#[path = "membership_tests.rs"]
mod tests;
