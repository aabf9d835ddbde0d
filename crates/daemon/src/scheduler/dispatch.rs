// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch plumbing.
//!
//! [`WorkerDispatch`] is the worker half: it runs on every node, executes
//! the specs the leader sends, streams output back, and reports the final
//! result. [`OutputHub`] is the leader half: it fans task output out to
//! however many submitters are following the task.

use crate::transport::{PeerMessage, PeerPool};
use mesh_adapters::{ExecutorError, ExecutorRouter, OutputChunk};
use mesh_core::{NodeId, OutputChannel, TaskId, TaskSpec};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keep this much of each output channel for the final task result.
const RESULT_TAIL_BYTES: usize = 64 * 1024;

/// Executes dispatched tasks on this node.
pub struct WorkerDispatch {
    node_id: NodeId,
    router: ExecutorRouter,
    peers: PeerPool,
    running: Mutex<HashMap<TaskId, CancellationToken>>,
}

impl WorkerDispatch {
    pub fn new(node_id: NodeId, router: ExecutorRouter, peers: PeerPool) -> Self {
        Self { node_id, router, peers, running: Mutex::new(HashMap::new()) }
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// Handle a `dispatch` RPC: launch the executor and see the task
    /// through. `leader` is whoever sent the dispatch; results flow back
    /// to them.
    pub fn start(self: &Arc<Self>, leader: NodeId, task_id: TaskId, spec: TaskSpec) {
        let cancel = CancellationToken::new();
        {
            let mut running = self.running.lock();
            if running.contains_key(&task_id) {
                debug!(task = %task_id, "duplicate dispatch ignored");
                return;
            }
            running.insert(task_id, cancel.clone());
        }
        info!(task = %task_id, node = %self.node_id, "executing dispatched task");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.peers.send(&leader, PeerMessage::TaskStartedMsg { task_id });

            let (chunk_tx, chunk_rx) = mpsc::channel::<OutputChunk>(64);
            let forwarder =
                tokio::spawn(forward_chunks(this.peers.clone(), leader, task_id, chunk_rx));

            let outcome = this.router.launch(task_id, spec, chunk_tx, cancel).await;
            let (stdout_tail, stderr_tail) = forwarder.await.unwrap_or_default();

            match outcome {
                Ok(exit_code) => {
                    this.peers.send(
                        &leader,
                        PeerMessage::TaskDone {
                            task_id,
                            exit_code,
                            stdout_tail,
                            stderr_tail,
                            error: None,
                        },
                    );
                }
                Err(ExecutorError::Cancelled) => {
                    // The cancel came from the leader; the state machine
                    // already committed the cancellation.
                    debug!(task = %task_id, "execution cancelled");
                }
                Err(e) => {
                    warn!(task = %task_id, error = %e, "execution failed to launch");
                    this.peers.send(
                        &leader,
                        PeerMessage::TaskDone {
                            task_id,
                            exit_code: -1,
                            stdout_tail,
                            stderr_tail,
                            error: Some(e.to_string()),
                        },
                    );
                }
            }
            this.running.lock().remove(&task_id);
        });
    }

    /// Handle a `cancel` RPC: best-effort terminate.
    pub fn cancel(&self, task_id: &TaskId) {
        if let Some(token) = self.running.lock().get(task_id) {
            info!(task = %task_id, "cancelling local execution");
            token.cancel();
        }
    }
}

/// Relay chunks to the leader while keeping a bounded tail of each channel
/// for the final result record.
async fn forward_chunks(
    peers: PeerPool,
    leader: NodeId,
    task_id: TaskId,
    mut rx: mpsc::Receiver<OutputChunk>,
) -> (String, String) {
    let mut stdout_tail: Vec<u8> = Vec::new();
    let mut stderr_tail: Vec<u8> = Vec::new();
    while let Some(chunk) = rx.recv().await {
        match chunk.channel {
            OutputChannel::Stdout => append_tail(&mut stdout_tail, &chunk.bytes),
            OutputChannel::Stderr => append_tail(&mut stderr_tail, &chunk.bytes),
            OutputChannel::Status => {}
        }
        peers.send(
            &leader,
            PeerMessage::TaskOutput { task_id, channel: chunk.channel, bytes: chunk.bytes },
        );
    }
    (
        String::from_utf8_lossy(&stdout_tail).into_owned(),
        String::from_utf8_lossy(&stderr_tail).into_owned(),
    )
}

fn append_tail(tail: &mut Vec<u8>, bytes: &[u8]) {
    tail.extend_from_slice(bytes);
    if tail.len() > RESULT_TAIL_BYTES {
        let excess = tail.len() - RESULT_TAIL_BYTES;
        tail.drain(..excess);
    }
}

/// Leader-side fan-out of task output to following submitters.
///
/// Per-task broadcast channels give each follower its own cursor; a
/// follower that stalls past the buffer loses the oldest chunks (they see
/// a lag marker), which is the backpressure contract. Status lines are
/// additionally retained and replayed on subscribe.
pub struct OutputHub {
    channels: Mutex<HashMap<TaskId, TaskChannel>>,
    capacity: usize,
}

struct TaskChannel {
    sender: broadcast::Sender<(OutputChannel, Vec<u8>)>,
    status_lines: Vec<Vec<u8>>,
}

impl OutputHub {
    /// `buffer_bytes` is the configured per-stream threshold; chunks are
    /// ~8 KiB, so the channel capacity derives from it.
    pub fn new(buffer_bytes: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: (buffer_bytes / 8192).clamp(16, 8192),
        }
    }

    pub fn push(&self, task_id: TaskId, channel: OutputChannel, bytes: Vec<u8>) {
        let mut channels = self.channels.lock();
        let entry = channels.entry(task_id).or_insert_with(|| TaskChannel {
            sender: broadcast::channel(self.capacity).0,
            status_lines: Vec::new(),
        });
        if channel == OutputChannel::Status {
            entry.status_lines.push(bytes.clone());
        }
        let _ = entry.sender.send((channel, bytes));
    }

    /// Follow a task's output. Also returns the retained status lines.
    pub fn subscribe(
        &self,
        task_id: TaskId,
    ) -> (broadcast::Receiver<(OutputChannel, Vec<u8>)>, Vec<Vec<u8>>) {
        let mut channels = self.channels.lock();
        let entry = channels.entry(task_id).or_insert_with(|| TaskChannel {
            sender: broadcast::channel(self.capacity).0,
            status_lines: Vec::new(),
        });
        (entry.sender.subscribe(), entry.status_lines.clone())
    }

    /// Drop a finished task's channel; followers see the stream end.
    pub fn close(&self, task_id: &TaskId) {
        self.channels.lock().remove(task_id);
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
