// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Peer transport: one multiplexed, length-prefixed JSON connection per
//! peer pair, carrying the four logical services (consensus, membership,
//! tasks, updater).
//!
//! Topology: every node runs an accept loop; outbound traffic goes through
//! a [`PeerPool`] holding one writer task per peer. Sends are
//! fire-and-forget; a dead peer costs a reconnect with backoff on the next
//! send, and the consensus heartbeat cadence provides the retry loop.
//! Request/reply pairs (probe, binary push/activate) correlate on a nonce.

mod messages;
mod pool;
mod server;

pub use messages::{PeerFrame, PeerMessage};
pub use pool::{PeerPool, RpcError};
pub use server::serve_peers;

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
