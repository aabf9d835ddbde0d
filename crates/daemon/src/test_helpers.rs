// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for daemon tests: a real single-node consensus driver
//! with a pump task that applies committed entries into a shared state.

use crate::transport::{PeerFrame, PeerPool};
use mesh_core::{FakeClock, NodeId};
use mesh_raft::{Applied, RaftConfig, RaftHandle, RaftNode, RaftTransport};
use mesh_state::ClusterState;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct NullTransport;

#[async_trait::async_trait]
impl RaftTransport for NullTransport {
    async fn send(&self, _to: &NodeId, _msg: mesh_raft::RaftMessage) {}
}

pub struct Fixture {
    pub raft: RaftHandle,
    pub state: Arc<RwLock<ClusterState>>,
    pub clock: FakeClock,
    pub peers: PeerPool,
    pub loopback_rx: mpsc::Receiver<PeerFrame>,
    pub node_id: NodeId,
    _dir: tempfile::TempDir,
}

/// A single-voter cluster that elects itself; committed entries are
/// applied straight into `state` by a background pump.
pub async fn leader_fixture(node_id: &str) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let id = NodeId::from_string(node_id);
    let clock = FakeClock::new();

    let config = RaftConfig::single(id, dir.path().join("meta.json"));
    let (node, raft, mut apply_rx) =
        RaftNode::new(config, clock.clone(), Arc::new(NullTransport), None).unwrap();
    tokio::spawn(node.run());

    let state = Arc::new(RwLock::new(ClusterState::default()));
    let pump_state = Arc::clone(&state);
    tokio::spawn(async move {
        while let Some(item) = apply_rx.recv().await {
            if let Applied::Entry(entry) = item {
                pump_state.write().apply(&entry);
            }
        }
    });

    // Wait out the election.
    for _ in 0..200 {
        if raft.is_leader() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(raft.is_leader(), "single node failed to elect itself");

    let (loopback_tx, loopback_rx) = mpsc::channel(256);
    let peers = PeerPool::new(id, loopback_tx);
    Fixture { raft, state, clock, peers, loopback_rx, node_id: id, _dir: dir }
}

/// Poll until `predicate` holds over the state, or panic after ~5s.
pub async fn wait_for(state: &Arc<RwLock<ClusterState>>, predicate: impl Fn(&ClusterState) -> bool) {
    for _ in 0..500 {
        if predicate(&state.read()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("state never reached the expected shape");
}
