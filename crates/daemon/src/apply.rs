// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The apply bus driver: the single writer of the cluster state.
//!
//! Committed entries come off the consensus channel in index order and go
//! through `ClusterState::apply` under the write lock. Everything else in
//! the daemon reads snapshots through the shared `RwLock`.
//!
//! On the leader, apply results ([`Action`]s) fan back out as new
//! proposals (retry, dead-letter, workflow-advance) or RPCs (cancel);
//! follower nodes compute the same actions and drop them.

use crate::scheduler::{OutputHub, SchedulerEvent};
use crate::transport::{PeerMessage, PeerPool};
use mesh_core::entry::{Command, LogEntry};
use mesh_core::{Clock, ClusterConfig, NodeId};
use mesh_raft::{Applied, RaftHandle};
use mesh_state::{Action, ClusterState, Snapshot};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct ApplyDriver<C: Clock> {
    pub config: Arc<ClusterConfig>,
    pub snapshot_path: PathBuf,
    pub self_id: NodeId,
    pub raft: RaftHandle,
    pub state: Arc<RwLock<ClusterState>>,
    pub peers: PeerPool,
    pub hub: Arc<OutputHub>,
    pub scheduler_tx: mpsc::Sender<SchedulerEvent>,
    pub apply_rx: mpsc::Receiver<Applied>,
    pub clock: C,
}

impl<C: Clock> ApplyDriver<C> {
    pub async fn run(mut self) {
        info!("apply bus started");
        while let Some(item) = self.apply_rx.recv().await {
            match item {
                Applied::Entry(entry) => self.apply_entry(entry).await,
                Applied::Snapshot { last_index, data, .. } => {
                    self.install_snapshot(last_index, &data).await;
                }
            }
        }
        info!("apply bus stopped");
    }

    async fn apply_entry(&self, entry: LogEntry) {
        debug!(index = entry.index, kind = entry.command.kind(), "applying entry");
        let actions = {
            let mut state = self.state.write();
            state.apply(&entry)
        };

        self.post_apply(&entry).await;

        if entry.index % self.config.snapshot_every.max(1) == 0 {
            self.checkpoint(entry.index, entry.term).await;
        }

        if !actions.is_empty() && self.raft.is_leader() {
            self.run_actions(actions);
        }
    }

    /// Side effects that are not state mutations: transport bookkeeping,
    /// scheduler wake-ups, stream teardown, voting-set maintenance.
    async fn post_apply(&self, entry: &LogEntry) {
        match &entry.command {
            Command::NodeJoin { node } => {
                self.peers.set_addr(node.id, node.dial_addr());
                self.refresh_members().await;
            }
            Command::NodeApprove { .. }
            | Command::NodeDrain { .. }
            | Command::NodeRemove { .. } => {
                self.refresh_members().await;
            }
            Command::NodeOffline { .. } => {
                self.refresh_members().await;
                let _ = self.scheduler_tx.try_send(SchedulerEvent::NodeOffline);
            }
            Command::NodeUpdateResources { .. } => {
                let _ = self.scheduler_tx.try_send(SchedulerEvent::ResourcesUpdated);
            }
            Command::TaskSubmit { .. }
            | Command::TaskRetry { .. }
            | Command::WorkflowSubmit { .. }
            | Command::WorkflowAdvance { .. } => {
                let _ = self.scheduler_tx.try_send(SchedulerEvent::TaskQueued);
            }
            Command::TaskComplete { task_id, .. }
            | Command::TaskFailed { task_id, .. }
            | Command::TaskCancel { task_id }
            | Command::TaskDeadLetter { task_id, .. } => {
                self.hub.close(task_id);
            }
            Command::TaskAssign { .. } | Command::TaskStarted { .. } | Command::Unknown => {}
        }
    }

    /// Push the current membership view into consensus and transport.
    async fn refresh_members(&self) {
        let (peer_list, voters, addrs) = {
            let state = self.state.read();
            let peer_list: Vec<NodeId> =
                state.nodes.keys().filter(|id| **id != self.self_id).copied().collect();
            let voters = crate::membership::MembershipManager::<C>::voting_set(
                &state,
                self.self_id,
            );
            let addrs: Vec<(NodeId, String)> = state
                .nodes
                .values()
                .filter(|n| n.id != self.self_id)
                .map(|n| (n.id, n.dial_addr()))
                .collect();
            (peer_list, voters, addrs)
        };
        for (id, addr) in addrs {
            self.peers.set_addr(id, addr);
        }
        self.raft.set_members(peer_list, voters).await;
    }

    /// Leader-only follow-ups, run off the bus so apply never blocks on
    /// replication.
    fn run_actions(&self, actions: Vec<Action>) {
        for action in actions {
            let raft = self.raft.clone();
            let peers = self.peers.clone();
            let timeout = Duration::from_millis(self.config.propose_timeout_ms);
            match action {
                Action::RetryTask { task_id, attempt, scheduled_after_ms } => {
                    debug!(task = %task_id, attempt, "scheduling retry");
                    tokio::spawn(async move {
                        let cmd = Command::TaskRetry { task_id, attempt, scheduled_after_ms };
                        if let Ok(Err(e)) = tokio::time::timeout(timeout, raft.propose(cmd)).await
                        {
                            warn!(task = %task_id, error = %e, "retry proposal failed");
                        }
                    });
                }
                Action::DeadLetterTask { task_id, reason } => {
                    tokio::spawn(async move {
                        let cmd = Command::TaskDeadLetter { task_id, reason };
                        if let Ok(Err(e)) = tokio::time::timeout(timeout, raft.propose(cmd)).await
                        {
                            warn!(task = %task_id, error = %e, "dead-letter proposal failed");
                        }
                    });
                }
                Action::CancelRunning { task_id, node_id } => {
                    peers.send(&node_id, PeerMessage::CancelTask { task_id });
                }
                Action::AdvanceWorkflow { workflow_id } => {
                    tokio::spawn(async move {
                        let cmd = Command::WorkflowAdvance { workflow_id };
                        if let Ok(Err(e)) = tokio::time::timeout(timeout, raft.propose(cmd)).await
                        {
                            warn!(workflow = %workflow_id, error = %e, "advance proposal failed");
                        }
                    });
                }
            }
        }
    }

    /// Cut a snapshot and let consensus compact the log behind it.
    async fn checkpoint(&self, index: u64, term: u64) {
        let snapshot = {
            let state = self.state.read();
            Snapshot::of(&state).with_term(term)
        };
        match snapshot.to_bytes() {
            Ok(bytes) => {
                if let Err(e) = snapshot.save(&self.snapshot_path) {
                    warn!(error = %e, "snapshot write failed");
                }
                self.raft.compact(index, bytes).await;
                info!(index, "state snapshot written");
            }
            Err(e) => warn!(error = %e, "snapshot serialization failed"),
        }
    }

    /// Replace local state with a leader-shipped snapshot (we fell behind
    /// the compaction horizon).
    async fn install_snapshot(&self, last_index: u64, data: &[u8]) {
        match Snapshot::from_bytes(data) {
            Ok(snapshot) => {
                info!(last_index, seq = snapshot.seq, "installing state snapshot");
                *self.state.write() = snapshot.state;
                if let Err(e) = Snapshot::of(&self.state.read()).save(&self.snapshot_path) {
                    warn!(error = %e, "snapshot write failed");
                }
                self.refresh_members().await;
            }
            Err(e) => {
                // A snapshot we cannot read means we cannot converge.
                error!(error = %e, "received unreadable snapshot");
            }
        }
    }
}

#[cfg(test)]
#[path = "apply_tests.rs"]
mod tests;
