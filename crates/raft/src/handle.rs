// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cheap cloneable handle onto the consensus driver task.

use crate::message::RaftMessage;
use mesh_core::entry::{Command, LogEntry, LogIndex, Term};
use mesh_core::node::NodeId;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

/// What the apply bus receives, in strict order.
#[derive(Debug, Clone)]
pub enum Applied {
    /// A committed entry, delivered exactly once in index order.
    Entry(LogEntry),
    /// A full-state snapshot installed from the leader; the state machine
    /// must replace its contents and resume after `last_index`.
    Snapshot { last_index: LogIndex, term: Term, data: Vec<u8> },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProposeError {
    #[error("not the leader")]
    NotLeader { hint: Option<NodeId> },
    #[error("no quorum reachable")]
    Unavailable,
    #[error("consensus driver stopped")]
    Shutdown,
}

/// Role + progress snapshot published through a watch channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RaftStatus {
    pub role: crate::node::RaftRole,
    pub term: Term,
    pub leader_id: Option<NodeId>,
    pub commit_index: LogIndex,
    pub last_log_index: LogIndex,
}

impl Default for RaftStatus {
    fn default() -> Self {
        Self {
            role: crate::node::RaftRole::Follower,
            term: 0,
            leader_id: None,
            commit_index: 0,
            last_log_index: 0,
        }
    }
}

/// Commands into the driver task.
pub(crate) enum DriverCommand {
    Propose {
        command: Command,
        reply: oneshot::Sender<Result<(LogIndex, Term), ProposeError>>,
    },
    Inbound {
        from: NodeId,
        msg: RaftMessage,
    },
    /// Replace the replication set (all peers) and the voting subset.
    SetMembers {
        peers: Vec<NodeId>,
        voters: Vec<NodeId>,
    },
    /// Fold the log prefix up to `last_index` into `snapshot` and drop it.
    Compact {
        last_index: LogIndex,
        snapshot: Vec<u8>,
    },
    /// Leader only: revert to follower and stand back from the next
    /// election so another node can win it (rolling-update yield).
    StepDown {
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Clone)]
pub struct RaftHandle {
    pub(crate) tx: mpsc::Sender<DriverCommand>,
    pub(crate) status_rx: watch::Receiver<RaftStatus>,
}

impl RaftHandle {
    /// Propose a command for replication. Resolves once the entry is
    /// committed (majority-acked), with its `(index, term)`.
    pub async fn propose(&self, command: Command) -> Result<(LogIndex, Term), ProposeError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(DriverCommand::Propose { command, reply })
            .await
            .map_err(|_| ProposeError::Shutdown)?;
        rx.await.map_err(|_| ProposeError::Shutdown)?
    }

    /// Deliver a peer's consensus message into the driver.
    pub async fn inbound(&self, from: NodeId, msg: RaftMessage) {
        let _ = self.tx.send(DriverCommand::Inbound { from, msg }).await;
    }

    pub async fn set_members(&self, peers: Vec<NodeId>, voters: Vec<NodeId>) {
        let _ = self.tx.send(DriverCommand::SetMembers { peers, voters }).await;
    }

    pub async fn compact(&self, last_index: LogIndex, snapshot: Vec<u8>) {
        let _ = self.tx.send(DriverCommand::Compact { last_index, snapshot }).await;
    }

    /// Ask the leader to yield. Returns false when this node is not leader.
    pub async fn step_down(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(DriverCommand::StepDown { reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Latest role/term/commit view, without a driver round trip.
    pub fn status(&self) -> RaftStatus {
        self.status_rx.borrow().clone()
    }

    /// Watch for status changes (used by tests and the daemon lifecycle).
    pub fn status_stream(&self) -> watch::Receiver<RaftStatus> {
        self.status_rx.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.status_rx.borrow().role == crate::node::RaftRole::Leader
    }

    pub fn current_leader(&self) -> Option<NodeId> {
        self.status_rx.borrow().leader_id
    }

    pub fn term(&self) -> Term {
        self.status_rx.borrow().term
    }
}
