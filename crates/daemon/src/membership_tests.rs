// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{leader_fixture, wait_for};
use mesh_core::test_support::active_node;
use mesh_core::{FakeClock, TaskState};
use std::collections::BTreeSet;

fn manager(
    fixture: &crate::test_helpers::Fixture,
    config: ClusterConfig,
) -> Arc<MembershipManager<FakeClock>> {
    Arc::new(MembershipManager::new(
        Arc::new(config),
        fixture.raft.clone(),
        Arc::clone(&fixture.state),
        fixture.clock.clone(),
    ))
}

fn ephemeral_node(id: &str) -> Node {
    let mut node = active_node(id);
    node.status = NodeStatus::PendingApproval;
    node.tags = BTreeSet::from(["ephemeral".to_string()]);
    node
}

fn plain_node(id: &str) -> Node {
    let mut node = active_node(id);
    node.status = NodeStatus::PendingApproval;
    node
}

#[tokio::test(start_paused = true)]
async fn ephemeral_join_is_auto_approved() {
    let fixture = leader_fixture("n1").await;
    let members = manager(&fixture, ClusterConfig::default());

    let (_, status) = members.handle_join(ephemeral_node("pxe-1")).await.unwrap();
    assert_eq!(status, "approved");

    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Active).unwrap_or(false)
    })
    .await;
    assert!(members.pending_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn untrusted_join_waits_for_the_operator() {
    let fixture = leader_fixture("n1").await;
    let members = manager(&fixture, ClusterConfig::default());

    let (request_id, status) = members.handle_join(plain_node("stranger")).await.unwrap();
    assert_eq!(status, "pending");
    assert!(fixture.state.read().get_node("stranger").is_none());
    assert_eq!(members.pending_requests().len(), 1);

    members.approve(request_id).await.unwrap();
    wait_for(&fixture.state, |s| {
        s.get_node("stranger").map(|n| n.status == NodeStatus::Active).unwrap_or(false)
    })
    .await;
    assert!(members.pending_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejected_join_is_discarded() {
    let fixture = leader_fixture("n1").await;
    let members = manager(&fixture, ClusterConfig::default());

    let (request_id, _) = members.handle_join(plain_node("stranger")).await.unwrap();
    assert!(members.reject(request_id));
    assert!(!members.reject(request_id));
    assert!(members.pending_requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn configured_tag_bypasses_approval() {
    let fixture = leader_fixture("n1").await;
    let config = ClusterConfig {
        auto_approve_tags: vec!["lab-trusted".to_string()],
        ..ClusterConfig::default()
    };
    let members = manager(&fixture, config);

    let mut node = plain_node("labbox");
    node.tags = BTreeSet::from(["lab-trusted".to_string()]);
    let (_, status) = members.handle_join(node).await.unwrap();
    assert_eq!(status, "approved");
}

#[tokio::test(start_paused = true)]
async fn heartbeat_revives_offline_node() {
    let fixture = leader_fixture("n1").await;
    let members = manager(&fixture, ClusterConfig::default());

    members.handle_join(ephemeral_node("pxe-1")).await.unwrap();
    wait_for(&fixture.state, |s| s.get_node("pxe-1").is_some()).await;

    fixture
        .raft
        .propose(Command::NodeOffline { node_id: NodeId::from_string("pxe-1") })
        .await
        .unwrap();
    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Offline).unwrap_or(false)
    })
    .await;

    members
        .on_heartbeat(NodeId::from_string("pxe-1"), ResourceSnapshot::default())
        .await;
    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Active).unwrap_or(false)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn monitor_marks_silent_nodes_offline() {
    let fixture = leader_fixture("n1").await;
    let config =
        ClusterConfig { heartbeat_timeout_ms: 15_000, ..ClusterConfig::default() };
    let members = manager(&fixture, config);

    members.handle_join(ephemeral_node("pxe-1")).await.unwrap();
    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Active).unwrap_or(false)
    })
    .await;

    tokio::spawn(Arc::clone(&members).run_monitor());

    // Nothing happens while the node is fresh.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(fixture.state.read().get_node("pxe-1").unwrap().status, NodeStatus::Active);

    // Push the fake clock past the timeout; the next tick notices.
    fixture.clock.advance_ms(20_000);
    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Offline).unwrap_or(false)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn sweep_removes_stale_offline_ephemerals_only() {
    let fixture = leader_fixture("n1").await;
    let config = ClusterConfig {
        ephemeral_cleanup_ttl_ms: 3_600_000,
        ephemeral_sweep_interval_ms: 1_000,
        ..ClusterConfig::default()
    };
    let members = manager(&fixture, config);

    members.handle_join(ephemeral_node("pxe-1")).await.unwrap();
    members.handle_join(plain_node("perm-1")).await.ok();
    // perm-1 was pending; approve it through the operator path.
    if let Some((request_id, _)) = members.pending_requests().first().cloned() {
        members.approve(request_id).await.unwrap();
    }
    wait_for(&fixture.state, |s| s.get_node("pxe-1").is_some() && s.get_node("perm-1").is_some())
        .await;

    for id in ["pxe-1", "perm-1"] {
        fixture
            .raft
            .propose(Command::NodeOffline { node_id: NodeId::from_string(id) })
            .await
            .unwrap();
    }
    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Offline).unwrap_or(false)
    })
    .await;

    tokio::spawn(Arc::clone(&members).run_ephemeral_sweep());

    // Within the TTL both survive.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(fixture.state.read().get_node("pxe-1").is_some());

    // Past the TTL only the ephemeral is removed.
    fixture.clock.advance_ms(3_700_000);
    wait_for(&fixture.state, |s| s.get_node("pxe-1").is_none()).await;
    assert!(fixture.state.read().get_node("perm-1").is_some());
}

#[tokio::test(start_paused = true)]
async fn draining_node_goes_offline_once_empty() {
    let fixture = leader_fixture("n1").await;
    let members = manager(&fixture, ClusterConfig::default());

    members.handle_join(ephemeral_node("pxe-1")).await.unwrap();
    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Active).unwrap_or(false)
    })
    .await;

    // Give the node a running task, then drain it.
    let task = mesh_core::test_support::shell_task("tsk-busy");
    fixture.raft.propose(Command::TaskSubmit { task }).await.unwrap();
    fixture
        .raft
        .propose(Command::TaskAssign {
            task_id: mesh_core::TaskId::from_string("tsk-busy"),
            node_id: NodeId::from_string("pxe-1"),
        })
        .await
        .unwrap();
    fixture
        .raft
        .propose(Command::NodeDrain { node_id: NodeId::from_string("pxe-1") })
        .await
        .unwrap();
    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Draining).unwrap_or(false)
    })
    .await;

    tokio::spawn(Arc::clone(&members).run_monitor());
    tokio::time::sleep(Duration::from_secs(3)).await;
    // Still holding a task: stays draining.
    assert_eq!(
        fixture.state.read().get_node("pxe-1").unwrap().status,
        NodeStatus::Draining
    );

    fixture
        .raft
        .propose(Command::TaskComplete {
            task_id: mesh_core::TaskId::from_string("tsk-busy"),
            result: mesh_core::TaskResult::default(),
        })
        .await
        .unwrap();
    wait_for(&fixture.state, |s| {
        s.get_task("tsk-busy").map(|t| t.state == TaskState::Completed).unwrap_or(false)
    })
    .await;

    // Empty now: the monitor retires it.
    wait_for(&fixture.state, |s| {
        s.get_node("pxe-1").map(|n| n.status == NodeStatus::Offline).unwrap_or(false)
    })
    .await;
}

#[test]
fn voting_set_excludes_workers_and_includes_self() {
    let mut state = ClusterState::default();
    let voter = active_node("n2");
    let mut worker = active_node("w1");
    worker.role = mesh_core::Role::Worker;
    state.nodes.insert(voter.id, voter);
    state.nodes.insert(worker.id, worker);

    let voters =
        MembershipManager::<FakeClock>::voting_set(&state, NodeId::from_string("n1"));
    assert_eq!(
        voters,
        vec![NodeId::from_string("n1"), NodeId::from_string("n2")]
    );
}
