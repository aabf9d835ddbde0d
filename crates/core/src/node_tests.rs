// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn ephemeral_tag_detection() {
    let node = Node::builder().build();
    assert!(!node.is_ephemeral());

    let mut tags = BTreeSet::new();
    tags.insert(EPHEMERAL_TAG.to_string());
    let node = Node::builder().tags(tags).build();
    assert!(node.is_ephemeral());
}

#[test]
fn only_active_is_schedulable() {
    assert!(NodeStatus::Active.schedulable());
    assert!(!NodeStatus::PendingApproval.schedulable());
    assert!(!NodeStatus::Draining.schedulable());
    assert!(!NodeStatus::Offline.schedulable());
}

#[test]
fn dial_addr_formats_host_port() {
    let node = Node::builder().address("10.0.0.3").port(7410).build();
    assert_eq!(node.dial_addr(), "10.0.0.3:7410");
}

#[test]
fn status_display_is_snake_case() {
    assert_eq!(NodeStatus::PendingApproval.to_string(), "pending_approval");
    assert_eq!(Role::Candidate.to_string(), "candidate");
}

#[test]
fn node_serde_round_trip() {
    let node = Node::builder().id("n2").build();
    let json = serde_json::to_string(&node).unwrap();
    let back: Node = serde_json::from_str(&json).unwrap();
    assert_eq!(back, node);
}
