// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-service rolling updater.
//!
//! Leader-orchestrated, follower by follower: drain → push binary →
//! activate → wait for rejoin, with rollback on a failed rejoin and a
//! hard abort on any detected quorum risk. The leader updates itself last,
//! yielding leadership first so its own restart never breaks quorum.

mod binary;

pub use binary::{digest_hex, restart_process, swap_in, UpdateReceiver};

use crate::transport::{PeerMessage, PeerPool};
use mesh_core::entry::Command;
use mesh_core::{Clock, ClusterConfig, NodeId, NodeStatus};
use mesh_raft::RaftHandle;
use mesh_state::ClusterState;
use mesh_wire::UpdateReport;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PUSH_TIMEOUT: Duration = Duration::from_secs(60);
const CHUNK_BYTES: usize = 1024 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct RollingUpdater<C: Clock> {
    config: Arc<ClusterConfig>,
    raft: RaftHandle,
    state: Arc<RwLock<ClusterState>>,
    peers: PeerPool,
    staged_binary_path: PathBuf,
    backup_binary_path: PathBuf,
    clock: C,
}

impl<C: Clock> RollingUpdater<C> {
    pub fn new(
        config: Arc<ClusterConfig>,
        raft: RaftHandle,
        state: Arc<RwLock<ClusterState>>,
        peers: PeerPool,
        staged_binary_path: PathBuf,
        backup_binary_path: PathBuf,
        clock: C,
    ) -> Self {
        Self { config, raft, state, peers, staged_binary_path, backup_binary_path, clock }
    }

    fn abort(reason: impl Into<String>, report: &mut UpdateReport, remaining: Vec<NodeId>) {
        report.aborted = Some(reason.into());
        report.skipped.extend(remaining);
    }

    /// Voting followers eligible for replacement, in id order.
    fn follower_plan(&self) -> (Vec<NodeId>, usize) {
        let state = self.state.read();
        let voters =
            crate::membership::MembershipManager::<C>::voting_set(&state, self.peers.self_id());
        let quorum = voters.len() / 2 + 1;
        let followers: Vec<NodeId> = voters
            .iter()
            .filter(|id| **id != self.peers.self_id())
            .filter(|id| {
                state
                    .get_node(id)
                    .map(|n| n.status == NodeStatus::Active)
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        (followers, quorum)
    }

    fn active_voter_count(&self) -> usize {
        let state = self.state.read();
        let voters =
            crate::membership::MembershipManager::<C>::voting_set(&state, self.peers.self_id());
        voters
            .iter()
            .filter(|id| {
                **id == self.peers.self_id()
                    || state
                        .get_node(id)
                        .map(|n| n.status == NodeStatus::Active)
                        .unwrap_or(false)
            })
            .count()
    }

    pub async fn initiate(&self, dry_run: bool) -> UpdateReport {
        let mut report = UpdateReport { dry_run, ..UpdateReport::default() };
        if !self.raft.is_leader() {
            report.aborted = Some("not the leader".into());
            return report;
        }

        let (followers, quorum) = self.follower_plan();

        // Taking any one voter down must leave a quorum standing.
        let voter_total = self.active_voter_count();
        if voter_total < quorum + 1 {
            Self::abort(
                format!("{voter_total} voting members cannot spare one (quorum {quorum})"),
                &mut report,
                followers,
            );
            return report;
        }

        // Every follower must be reachable over the blob transport.
        for follower in &followers {
            let nonce = self.peers.next_nonce();
            let probe = self
                .peers
                .call(follower, nonce, PeerMessage::Probe { nonce }, PROBE_TIMEOUT)
                .await;
            if probe.is_err() {
                Self::abort(
                    format!("follower {follower} unreachable"),
                    &mut report,
                    followers.clone(),
                );
                return report;
            }
        }

        if dry_run {
            report.updated = followers;
            report.updated.push(self.peers.self_id());
            return report;
        }

        let binary = match std::fs::read(&self.staged_binary_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                Self::abort(
                    format!("no staged binary at {}: {e}", self.staged_binary_path.display()),
                    &mut report,
                    followers,
                );
                return report;
            }
        };
        let digest = digest_hex(&binary);
        info!(bytes = binary.len(), %digest, "starting rolling update");

        for (i, follower) in followers.iter().enumerate() {
            // Abort on any concurrent quorum risk before touching a voter.
            if self.active_voter_count() < quorum + 1 {
                Self::abort(
                    "voting membership shrank below safe threshold",
                    &mut report,
                    followers[i..].to_vec(),
                );
                return report;
            }
            match self.update_follower(*follower, &binary, &digest).await {
                Ok(()) => report.updated.push(*follower),
                Err(UpdateStepError::RolledBack(reason)) => {
                    warn!(node = %follower, reason, "follower rolled back, aborting update");
                    report.rolled_back.push(*follower);
                    Self::abort(reason, &mut report, followers[i + 1..].to_vec());
                    return report;
                }
                Err(UpdateStepError::Failed(reason)) => {
                    Self::abort(reason, &mut report, followers[i..].to_vec());
                    return report;
                }
            }
        }

        // Leader last: swap our own binary, yield, and restart once a new
        // leader exists. The caller gets the report before the restart.
        if let Err(e) = swap_in(&self.staged_binary_path, &self.backup_binary_path) {
            Self::abort(format!("leader binary swap failed: {e}"), &mut report, vec![]);
            return report;
        }
        report.updated.push(self.peers.self_id());
        info!("all followers updated; leader yielding and restarting");

        let raft = self.raft.clone();
        let self_id = self.peers.self_id();
        tokio::spawn(async move {
            raft.step_down().await;
            // Wait for a successor so the restart never leaves the cluster
            // leaderless longer than one election.
            let mut status = raft.status_stream();
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            loop {
                let current = status.borrow().leader_id;
                if matches!(current, Some(id) if id != self_id) {
                    break;
                }
                if tokio::time::Instant::now() > deadline || status.changed().await.is_err() {
                    break;
                }
            }
            sleep(Duration::from_millis(500)).await;
            let e = restart_process();
            warn!(error = %e, "self restart failed; still on new binary at next start");
        });

        report
    }

    async fn update_follower(
        &self,
        follower: NodeId,
        binary: &[u8],
        digest: &str,
    ) -> Result<(), UpdateStepError> {
        info!(node = %follower, "updating follower");

        // Drain, bounded.
        if self
            .raft
            .propose(Command::NodeDrain { node_id: follower })
            .await
            .is_err()
        {
            return Err(UpdateStepError::Failed("drain proposal failed".into()));
        }
        let drain_deadline = self.clock.epoch_ms() + self.config.drain_timeout_ms;
        loop {
            let busy = !self.state.read().tasks_on_node(&follower).is_empty();
            if !busy || self.clock.epoch_ms() > drain_deadline {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }

        // Push the blob in chunks; the last chunk's nonce carries the ack.
        let nonce = self.peers.next_nonce();
        let chunks: Vec<&[u8]> = binary.chunks(CHUNK_BYTES).collect();
        let total = chunks.len();
        for (seq, chunk) in chunks.iter().enumerate().take(total.saturating_sub(1)) {
            self.peers.send(
                &follower,
                PeerMessage::PushBinary {
                    nonce,
                    seq: seq as u32,
                    bytes: chunk.to_vec(),
                    last: false,
                },
            );
        }
        let last = chunks.last().copied().unwrap_or(&[]);
        let ack = self
            .peers
            .call(
                &follower,
                nonce,
                PeerMessage::PushBinary {
                    nonce,
                    seq: total.saturating_sub(1) as u32,
                    bytes: last.to_vec(),
                    last: true,
                },
                PUSH_TIMEOUT,
            )
            .await;
        match ack {
            Ok(PeerMessage::PushBinaryAck { digest: got, .. }) if got == digest => {}
            Ok(PeerMessage::PushBinaryAck { digest: got, .. }) => {
                return Err(UpdateStepError::Failed(format!(
                    "digest mismatch on {follower}: {got} != {digest}"
                )));
            }
            Ok(_) | Err(_) => {
                return Err(UpdateStepError::Failed(format!("binary push to {follower} failed")));
            }
        }

        // Activate; the follower restarts right after acking.
        let nonce = self.peers.next_nonce();
        let activated_at = self.clock.epoch_ms();
        let ack = self
            .peers
            .call(
                &follower,
                nonce,
                PeerMessage::ActivateBinary { nonce, digest: digest.to_string() },
                PROBE_TIMEOUT,
            )
            .await;
        match ack {
            Ok(PeerMessage::ActivateAck { ok: true, .. }) => {}
            _ => {
                return Err(UpdateStepError::Failed(format!(
                    "activation refused by {follower}"
                )));
            }
        }

        // Wait for the follower to come back as an active member of the
        // current term.
        let deadline = activated_at + self.config.update_rejoin_timeout_ms;
        loop {
            {
                let state = self.state.read();
                if let Some(node) = state.get_node(&follower) {
                    if node.status == NodeStatus::Active && node.last_seen_ms > activated_at {
                        info!(node = %follower, "follower rejoined on new binary");
                        return Ok(());
                    }
                }
            }
            if self.clock.epoch_ms() > deadline {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }

        // Rejoin timed out: roll the follower back.
        let nonce = self.peers.next_nonce();
        let _ = self
            .peers
            .call(&follower, nonce, PeerMessage::RollbackBinary { nonce }, PROBE_TIMEOUT)
            .await;
        Err(UpdateStepError::RolledBack(format!(
            "{follower} did not rejoin within {}ms",
            self.config.update_rejoin_timeout_ms
        )))
    }
}

enum UpdateStepError {
    /// The follower was told to roll back to the old binary.
    RolledBack(String),
    /// Nothing was activated on the follower; it stays on the old binary.
    Failed(String),
}

#[cfg(test)]
#[path = "updater_tests.rs"]
mod tests;
