// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler: a single leader-only loop turning ready tasks into
//! `task_assign` entries and dispatch RPCs.
//!
//! The loop sleeps on its event channel and a timer aimed at the earliest
//! `scheduled_after` gate. Placement itself is pure (`placement`), so the
//! loop body is: snapshot state, pick, propose, dispatch.

mod dispatch;
mod placement;

pub use dispatch::{OutputHub, WorkerDispatch};
pub use placement::{eligible_nodes, rank_candidates, satisfiable_by_any};

use crate::transport::{PeerMessage, PeerPool};
use mesh_core::entry::Command;
use mesh_core::{Clock, ClusterConfig, NodeId, Task, TaskId};
use mesh_raft::RaftHandle;
use mesh_state::ClusterState;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why the scheduler loop woke up. The payload is deliberately thin; the
/// loop always re-reads the state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A `task_submit`, `task_retry`, or `workflow_advance` committed.
    TaskQueued,
    /// A `node_update_resources` committed.
    ResourcesUpdated,
    /// A `node_offline` committed (reassignments already queued by apply).
    NodeOffline,
}

/// Fallback poll interval while nothing is scheduled.
const IDLE_TICK: Duration = Duration::from_secs(1);

pub struct Scheduler<C: Clock> {
    config: Arc<ClusterConfig>,
    raft: RaftHandle,
    state: Arc<RwLock<ClusterState>>,
    peers: PeerPool,
    clock: C,
    events: mpsc::Receiver<SchedulerEvent>,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(
        config: Arc<ClusterConfig>,
        raft: RaftHandle,
        state: Arc<RwLock<ClusterState>>,
        peers: PeerPool,
        clock: C,
        events: mpsc::Receiver<SchedulerEvent>,
    ) -> Self {
        Self { config, raft, state, peers, clock, events }
    }

    pub async fn run(mut self) {
        info!("scheduler loop started");
        loop {
            let sleep_for = self.next_wake();
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        None => break,
                        Some(event) => {
                            debug!(?event, "scheduler woken");
                            // Coalesce whatever else queued up.
                            while self.events.try_recv().is_ok() {}
                        }
                    }
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
            if !self.raft.is_leader() {
                continue;
            }
            self.place_ready_tasks().await;
        }
        info!("scheduler loop stopped");
    }

    /// Sleep until the earliest backoff gate opens, or the idle tick.
    fn next_wake(&self) -> Duration {
        let now = self.clock.epoch_ms();
        match self.state.read().next_scheduled_after(now) {
            Some(at) => Duration::from_millis(at.saturating_sub(now).max(1)),
            None => IDLE_TICK,
        }
    }

    async fn place_ready_tasks(&self) {
        let now = self.clock.epoch_ms();
        // Snapshot the placement inputs; proposals mutate state only via
        // the apply bus, never under this read.
        let (ready, nodes): (Vec<Task>, Vec<mesh_core::Node>) = {
            let state = self.state.read();
            (
                state.queued_tasks_ready_now(now).into_iter().cloned().collect(),
                state.nodes.values().cloned().collect(),
            )
        };
        if ready.is_empty() {
            return;
        }

        // Debit candidate capacity as this pass hands out work, so one
        // fat node does not absorb every task in the batch.
        let mut debits: HashMap<NodeId, u64> = HashMap::new();

        for task in ready {
            let candidates = placement::eligible_nodes(&task, nodes.iter(), &debits);
            let Some(node_id) =
                placement::rank_candidates(candidates, self.config.scheduler_tie_break)
            else {
                debug!(task = %task.id, "no eligible node right now");
                continue;
            };

            match self.assign(task.id, node_id).await {
                Ok(()) => {
                    *debits.entry(node_id).or_insert(0) +=
                        task.constraints.mem_bytes.unwrap_or(0);
                    let msg = PeerMessage::Dispatch {
                        task_id: task.id,
                        spec: task.spec.clone(),
                        attempt: task.attempt,
                    };
                    self.peers.send(&node_id, msg);
                    info!(task = %task.id, node = %node_id, "task dispatched");
                }
                Err(e) => {
                    // Lost leadership mid-pass or no quorum; the next
                    // leader picks the task up from the same queue.
                    warn!(task = %task.id, error = %e, "assign proposal failed");
                    return;
                }
            }
        }
    }

    async fn assign(&self, task_id: TaskId, node_id: NodeId) -> Result<(), mesh_raft::ProposeError> {
        let propose = self.raft.propose(Command::TaskAssign { task_id, node_id });
        let timeout = Duration::from_millis(self.config.propose_timeout_ms);
        match tokio::time::timeout(timeout, propose).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(mesh_raft::ProposeError::Unavailable),
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
