// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mesh-raft: strong-leader replicated log.
//!
//! One [`RaftNode`] task per process owns all volatile consensus state;
//! everything else talks to it through a [`RaftHandle`]. Committed entries
//! come out of a single ordered channel (the apply bus) exactly once per
//! process lifetime, and `(term, voted_for)` hits disk before any vote is
//! answered.
//!
//! The log itself is in-memory and compacted against the state-machine
//! snapshot; a follower that has fallen behind the leader's compaction
//! horizon is caught up with a full snapshot transfer.

mod handle;
mod log;
mod message;
mod metadata;
mod node;
mod transport;

pub use handle::{Applied, ProposeError, RaftHandle, RaftStatus};
pub use log::RaftLog;
pub use message::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, RaftMessage, RequestVoteArgs,
    RequestVoteReply,
};
pub use metadata::{Metadata, MetadataError, MetadataStore};
pub use node::{RaftConfig, RaftNode, RaftRole};
pub use transport::RaftTransport;

#[cfg(any(test, feature = "test-support"))]
pub use transport::{InMemoryMesh, MeshEndpoint};
