// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::transport::{PeerFrame, PeerMessage, PeerPool};
use mesh_adapters::{ExecutorRouter, FakeExecutor};
use mesh_core::{NodeId, OutputChannel, TaskId, TaskSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn shell_spec(command: &str) -> TaskSpec {
    TaskSpec::Shell { command: command.into(), env: Default::default(), cwd: None }
}

/// Worker whose "leader" is itself, so every report loops back to the test.
fn local_worker(fake: &FakeExecutor) -> (Arc<WorkerDispatch>, mpsc::Receiver<PeerFrame>, NodeId) {
    let id = NodeId::from_string("n1");
    let (loopback_tx, loopback_rx) = mpsc::channel(256);
    let peers = PeerPool::new(id, loopback_tx);
    let mut router = ExecutorRouter::new();
    router.register(Arc::new(fake.clone()));
    (Arc::new(WorkerDispatch::new(id, router, peers)), loopback_rx, id)
}

async fn next_msg(rx: &mut mpsc::Receiver<PeerFrame>) -> PeerMessage {
    timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap().msg
}

#[tokio::test]
async fn dispatched_task_reports_started_output_and_done() {
    let fake = FakeExecutor::new();
    fake.script("build", 0, "compiled ok", "");
    let (worker, mut rx, leader) = local_worker(&fake);

    worker.start(leader, TaskId::from_string("tsk-d"), shell_spec("build"));

    assert_eq!(
        next_msg(&mut rx).await,
        PeerMessage::TaskStartedMsg { task_id: TaskId::from_string("tsk-d") }
    );
    match next_msg(&mut rx).await {
        PeerMessage::TaskOutput { channel, bytes, .. } => {
            assert_eq!(channel, OutputChannel::Stdout);
            assert_eq!(bytes, b"compiled ok");
        }
        other => panic!("expected output, got {other:?}"),
    }
    match next_msg(&mut rx).await {
        PeerMessage::TaskDone { exit_code, stdout_tail, error, .. } => {
            assert_eq!(exit_code, 0);
            assert_eq!(stdout_tail, "compiled ok");
            assert!(error.is_none());
        }
        other => panic!("expected done, got {other:?}"),
    }
    assert_eq!(worker.running_count(), 0);
}

#[tokio::test]
async fn failing_task_reports_nonzero_exit() {
    let fake = FakeExecutor::new();
    fake.script("flaky", 2, "", "segfault");
    let (worker, mut rx, leader) = local_worker(&fake);

    worker.start(leader, TaskId::from_string("tsk-f"), shell_spec("flaky"));

    let _started = next_msg(&mut rx).await;
    let _output = next_msg(&mut rx).await;
    match next_msg(&mut rx).await {
        PeerMessage::TaskDone { exit_code, stderr_tail, .. } => {
            assert_eq!(exit_code, 2);
            assert_eq!(stderr_tail, "segfault");
        }
        other => panic!("expected done, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_stops_a_hanging_task_without_a_done_report() {
    let fake = FakeExecutor::new();
    fake.script_hang("stuck");
    let (worker, mut rx, leader) = local_worker(&fake);

    let task_id = TaskId::from_string("tsk-h");
    worker.start(leader, task_id, shell_spec("stuck"));
    let _started = next_msg(&mut rx).await;
    assert_eq!(worker.running_count(), 1);

    worker.cancel(&task_id);
    // The execution winds down without reporting a result.
    timeout(Duration::from_secs(5), async {
        while worker.running_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn duplicate_dispatch_is_ignored() {
    let fake = FakeExecutor::new();
    fake.script_hang("stuck");
    let (worker, mut rx, leader) = local_worker(&fake);
    let task_id = TaskId::from_string("tsk-dup");

    worker.start(leader, task_id, shell_spec("stuck"));
    worker.start(leader, task_id, shell_spec("stuck"));

    let _started = next_msg(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Only one started report; the second dispatch was dropped.
    assert!(rx.try_recv().is_err());
    assert_eq!(fake.launches().len(), 1);
    worker.cancel(&task_id);
}

#[tokio::test]
async fn hub_fans_out_and_ends_on_close() {
    let hub = OutputHub::new(1024 * 1024);
    let task_id = TaskId::from_string("tsk-hub");

    let (mut rx1, _) = hub.subscribe(task_id);
    let (mut rx2, _) = hub.subscribe(task_id);

    hub.push(task_id, OutputChannel::Stdout, b"line".to_vec());
    assert_eq!(rx1.recv().await.unwrap().1, b"line");
    assert_eq!(rx2.recv().await.unwrap().1, b"line");

    hub.close(&task_id);
    assert!(matches!(
        rx1.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Closed)
    ));
}

#[tokio::test]
async fn hub_replays_status_lines_to_late_subscribers() {
    let hub = OutputHub::new(1024 * 1024);
    let task_id = TaskId::from_string("tsk-late");

    hub.push(task_id, OutputChannel::Status, b"job created".to_vec());
    hub.push(task_id, OutputChannel::Stdout, b"noise".to_vec());

    let (_rx, status_lines) = hub.subscribe(task_id);
    assert_eq!(status_lines, vec![b"job created".to_vec()]);
}

#[tokio::test]
async fn hub_lag_drops_oldest_chunks() {
    // Tiny buffer so the 17th chunk overwrites the first.
    let hub = OutputHub::new(1);
    let task_id = TaskId::from_string("tsk-lag");
    let (mut rx, _) = hub.subscribe(task_id);

    for i in 0..40u8 {
        hub.push(task_id, OutputChannel::Stdout, vec![i]);
    }

    match rx.recv().await {
        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
            assert!(skipped > 0);
        }
        other => panic!("expected lag, got {other:?}"),
    }
}
