// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mesh-state: the replicated state machine.
//!
//! [`ClusterState`] is mutated in exactly one place: `apply`, fed committed
//! entries in index order by the apply bus. Handlers are deterministic
//! (timestamps come from the entry, never the wall clock) and idempotent
//! (re-applying a committed entry is a no-op), so every node and every
//! replay converges on the same state.
//!
//! Applying an entry can yield [`Action`]s: follow-up work only the leader
//! performs, always by proposing new entries; the state machine itself
//! never talks to the network.

pub mod condition;

mod actions;
mod machine;
mod nodes;
mod snapshot;
mod tasks;
mod workflows;

pub use actions::Action;
pub use machine::ClusterState;
pub use snapshot::{load_snapshot, Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
