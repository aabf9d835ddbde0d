// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer-to-peer message surface.

use mesh_core::{Node, OutputChannel, ResourceSnapshot, TaskId, TaskSpec};
use mesh_raft::RaftMessage;
use serde::{Deserialize, Serialize};

/// Envelope on the wire: who sent it plus the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerFrame {
    pub from: mesh_core::NodeId,
    pub msg: PeerMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    // === Consensus service ===
    Raft(RaftMessage),

    // === Membership service ===
    /// Periodic liveness + capacity report toward the leader.
    Heartbeat { resources: ResourceSnapshot, last_known_term: u64 },
    /// A prospective member presenting itself to the leader.
    JoinRequest { node: Node },
    /// Leader's answer to a join.
    JoinReply {
        request_id: mesh_core::RequestId,
        /// "approved" | "pending" | "rejected"
        status: String,
    },

    // === Task service ===
    /// Leader → assigned node: run this.
    Dispatch { task_id: TaskId, spec: TaskSpec, attempt: u32 },
    /// Assigned node → leader: executor accepted the work.
    TaskStartedMsg { task_id: TaskId },
    /// Assigned node → leader: one output chunk.
    TaskOutput { task_id: TaskId, channel: OutputChannel, bytes: Vec<u8> },
    /// Assigned node → leader: execution ended.
    TaskDone {
        task_id: TaskId,
        exit_code: i32,
        stdout_tail: String,
        stderr_tail: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Leader → assigned node: best-effort terminate.
    CancelTask { task_id: TaskId },

    // === Updater service ===
    /// Reachability probe before a rolling update.
    Probe { nonce: u64 },
    ProbeAck { nonce: u64 },
    /// One chunk of a staged binary.
    PushBinary { nonce: u64, seq: u32, bytes: Vec<u8>, last: bool },
    /// Receiver's digest of the fully staged binary.
    PushBinaryAck { nonce: u64, digest: String },
    /// Swap to the staged binary (digest must match) and restart.
    ActivateBinary { nonce: u64, digest: String },
    ActivateAck { nonce: u64, ok: bool },
    /// Restore the previous binary and restart.
    RollbackBinary { nonce: u64 },
    RollbackAck { nonce: u64 },
}

impl PeerMessage {
    /// Correlation nonce for request/reply pairs, if this is a reply.
    pub fn reply_nonce(&self) -> Option<u64> {
        match self {
            PeerMessage::ProbeAck { nonce }
            | PeerMessage::PushBinaryAck { nonce, .. }
            | PeerMessage::ActivateAck { nonce, .. }
            | PeerMessage::RollbackAck { nonce } => Some(*nonce),
            _ => None,
        }
    }
}
