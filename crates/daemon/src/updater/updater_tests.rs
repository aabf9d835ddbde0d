// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{leader_fixture, wait_for, Fixture};
use mesh_core::test_support::active_node;
use mesh_core::FakeClock;

fn updater_for(fixture: &Fixture, dir: &std::path::Path) -> RollingUpdater<FakeClock> {
    RollingUpdater::new(
        Arc::new(ClusterConfig::default()),
        fixture.raft.clone(),
        Arc::clone(&fixture.state),
        fixture.peers.clone(),
        dir.join("update.bin"),
        dir.join("meshd.bin.bak"),
        fixture.clock.clone(),
    )
}

async fn add_voter(fixture: &Fixture, id: &str) {
    let node = active_node(id);
    fixture
        .raft
        .propose(Command::NodeJoin { node: node.clone() })
        .await
        .unwrap();
    fixture
        .raft
        .propose(Command::NodeApprove { node_id: node.id })
        .await
        .unwrap();
    wait_for(&fixture.state, |s| {
        s.get_node(id).map(|n| n.status == NodeStatus::Active).unwrap_or(false)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn two_voters_cannot_update_in_service() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = leader_fixture("n1").await;
    add_voter(&fixture, "n2").await;

    let updater = updater_for(&fixture, dir.path());
    let report = updater.initiate(true).await;

    // Quorum of 2 voters is 2; taking one down breaks it.
    assert!(report.aborted.is_some());
    assert!(report.updated.is_empty());
    assert_eq!(report.skipped, vec![NodeId::from_string("n2")]);
}

#[tokio::test(start_paused = true)]
async fn unreachable_follower_fails_preflight() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = leader_fixture("n1").await;
    add_voter(&fixture, "n2").await;
    add_voter(&fixture, "n3").await;

    // Three voters, quorum 2: arithmetic passes, but the probes go
    // nowhere (no transport behind the test pool).
    let updater = updater_for(&fixture, dir.path());
    let report = updater.initiate(true).await;

    assert!(report.aborted.as_deref().unwrap_or("").contains("unreachable"));
    assert!(report.updated.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dry_run_plans_followers_then_self() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = leader_fixture("n1").await;
    add_voter(&fixture, "n2").await;
    add_voter(&fixture, "n3").await;

    // Followers need dial addresses for the reachability probes.
    fixture.peers.set_addr(NodeId::from_string("n2"), "127.0.0.1:1".into());
    fixture.peers.set_addr(NodeId::from_string("n3"), "127.0.0.1:1".into());
    let updater = updater_for(&fixture, dir.path());

    // Answer the reachability probes as the followers would.
    let autoresponder = updater_probe_autoresponder(&fixture);
    let report = updater.initiate(true).await;
    autoresponder.abort();

    assert!(report.aborted.is_none(), "aborted: {:?}", report.aborted);
    assert!(report.dry_run);
    assert_eq!(
        report.updated,
        vec![
            NodeId::from_string("n2"),
            NodeId::from_string("n3"),
            NodeId::from_string("n1"),
        ]
    );
    assert!(report.rolled_back.is_empty());
}

/// Spawn a task that fulfills probe calls as if the follower answered.
fn updater_probe_autoresponder(fixture: &Fixture) -> tokio::task::JoinHandle<()> {
    let pool = fixture.peers.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(20)).await;
            // Nonces are allocated in order; resolve anything outstanding.
            for nonce in 1..200 {
                let _ = pool.resolve_reply(&PeerMessage::ProbeAck { nonce });
            }
        }
    })
}

#[test]
fn digest_is_stable_sha256() {
    assert_eq!(
        digest_hex(b"hello"),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
    );
}

#[tokio::test]
async fn receiver_assembles_chunks_and_digests() {
    let dir = tempfile::tempdir().unwrap();
    let id = NodeId::from_string("n1");
    let (loopback_tx, mut loopback_rx) = tokio::sync::mpsc::channel(64);
    let pool = PeerPool::new(id, loopback_tx);
    let receiver = UpdateReceiver::new(
        pool,
        dir.path().join("update.bin"),
        dir.path().join("meshd.bin.bak"),
    );

    let payload = vec![7u8; 3000];
    let leader = NodeId::from_string("n1");
    receiver.handle(
        leader,
        PeerMessage::PushBinary { nonce: 5, seq: 0, bytes: payload[..1000].to_vec(), last: false },
    );
    receiver.handle(
        leader,
        PeerMessage::PushBinary { nonce: 5, seq: 1, bytes: payload[1000..2000].to_vec(), last: false },
    );
    receiver.handle(
        leader,
        PeerMessage::PushBinary { nonce: 5, seq: 2, bytes: payload[2000..].to_vec(), last: true },
    );

    // The ack goes to the "leader", which is this pool's loopback.
    let frame = loopback_rx.recv().await.unwrap();
    match frame.msg {
        PeerMessage::PushBinaryAck { nonce, digest } => {
            assert_eq!(nonce, 5);
            assert_eq!(digest, digest_hex(&payload));
        }
        other => panic!("expected ack, got {other:?}"),
    }
    assert_eq!(std::fs::read(dir.path().join("update.bin")).unwrap(), payload);
}

#[tokio::test]
async fn receiver_rejects_out_of_order_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let id = NodeId::from_string("n1");
    let (loopback_tx, mut loopback_rx) = tokio::sync::mpsc::channel(64);
    let pool = PeerPool::new(id, loopback_tx);
    let receiver = UpdateReceiver::new(
        pool,
        dir.path().join("update.bin"),
        dir.path().join("meshd.bin.bak"),
    );

    let leader = NodeId::from_string("n1");
    receiver.handle(
        leader,
        PeerMessage::PushBinary { nonce: 5, seq: 0, bytes: vec![1], last: false },
    );
    // Skip seq 1: the final chunk must produce an empty (garbage) digest.
    receiver.handle(
        leader,
        PeerMessage::PushBinary { nonce: 5, seq: 2, bytes: vec![3], last: true },
    );

    let frame = loopback_rx.recv().await.unwrap();
    match frame.msg {
        PeerMessage::PushBinaryAck { digest, .. } => assert!(digest.is_empty()),
        other => panic!("expected ack, got {other:?}"),
    }
}

#[tokio::test]
async fn receiver_answers_probes() {
    let id = NodeId::from_string("n1");
    let dir = tempfile::tempdir().unwrap();
    let (loopback_tx, mut loopback_rx) = tokio::sync::mpsc::channel(64);
    let pool = PeerPool::new(id, loopback_tx);
    let receiver = UpdateReceiver::new(
        pool,
        dir.path().join("update.bin"),
        dir.path().join("meshd.bin.bak"),
    );

    receiver.handle(NodeId::from_string("n1"), PeerMessage::Probe { nonce: 42 });
    let frame = loopback_rx.recv().await.unwrap();
    assert_eq!(frame.msg, PeerMessage::ProbeAck { nonce: 42 });
}
