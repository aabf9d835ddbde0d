// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound side of the peer transport.
//!
//! One writer task per peer, fed by a bounded queue. The writer dials
//! lazily, redials with capped backoff, and drops queued frames when a
//! peer stays unreachable. Consensus retransmits, so loss here is safe.

use super::messages::{PeerFrame, PeerMessage};
use mesh_core::NodeId;
use mesh_wire::write_message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const PEER_QUEUE_DEPTH: usize = 256;
const REDIAL_BACKOFF_MIN: Duration = Duration::from_millis(200);
const REDIAL_BACKOFF_MAX: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("peer {0} has no known address")]
    Unknown(NodeId),
    #[error("timed out waiting for reply from {0}")]
    Timeout(NodeId),
    #[error("transport shut down")]
    Closed,
}

struct PeerLink {
    queue: mpsc::Sender<PeerMessage>,
}

struct PoolInner {
    addrs: HashMap<NodeId, String>,
    links: HashMap<NodeId, PeerLink>,
    /// Waiters for request/reply correlation nonces.
    pending: HashMap<u64, oneshot::Sender<PeerMessage>>,
}

/// Cloneable handle over the outbound links.
#[derive(Clone)]
pub struct PeerPool {
    self_id: NodeId,
    inner: Arc<Mutex<PoolInner>>,
    nonce: Arc<AtomicU64>,
    /// Frames addressed to ourselves loop straight back to the inbound
    /// router (the leader is often also an executor).
    loopback: mpsc::Sender<PeerFrame>,
}

impl PeerPool {
    pub fn new(self_id: NodeId, loopback: mpsc::Sender<PeerFrame>) -> Self {
        Self {
            self_id,
            inner: Arc::new(Mutex::new(PoolInner {
                addrs: HashMap::new(),
                links: HashMap::new(),
                pending: HashMap::new(),
            })),
            nonce: Arc::new(AtomicU64::new(1)),
            loopback,
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Record (or refresh) a peer's dial address.
    pub fn set_addr(&self, id: NodeId, addr: String) {
        let mut inner = self.inner.lock();
        let stale = inner.addrs.insert(id, addr.clone()).map(|old| old != addr).unwrap_or(false);
        if stale {
            // Address moved (PXE reboot): drop the link so the writer redials.
            inner.links.remove(&id);
            debug!(peer = %id, %addr, "peer address changed");
        }
    }

    pub fn known_addr(&self, id: &NodeId) -> Option<String> {
        self.inner.lock().addrs.get(id).cloned()
    }

    pub fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a message to a peer. Dials lazily; drops when the peer's
    /// queue is full or its address is unknown.
    pub fn send(&self, to: &NodeId, msg: PeerMessage) {
        if *to == self.self_id {
            let frame = PeerFrame { from: self.self_id, msg };
            if self.loopback.try_send(frame).is_err() {
                warn!("loopback queue full, dropping frame");
            }
            return;
        }

        let mut inner = self.inner.lock();
        let msg = match inner.links.get(to) {
            Some(link) => match link.queue.try_send(msg) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(msg)) => {
                    // Writer is saturated; drop the frame, keep the link.
                    debug!(peer = %to, "peer queue full, dropping frame");
                    let _ = msg;
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(msg)) => {
                    // Writer exited; rebuild the link below.
                    inner.links.remove(to);
                    msg
                }
            },
            None => msg,
        };
        let Some(addr) = inner.addrs.get(to).cloned() else {
            debug!(peer = %to, "no address for peer, dropping frame");
            return;
        };
        let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
        let _ = tx.try_send(msg);
        inner.links.insert(*to, PeerLink { queue: tx });
        drop(inner);

        let from = self.self_id;
        let peer = *to;
        tokio::spawn(writer_task(from, peer, addr, rx));
    }

    /// Send a request and wait for the correlated reply.
    pub async fn call(
        &self,
        to: &NodeId,
        nonce: u64,
        msg: PeerMessage,
        timeout: Duration,
    ) -> Result<PeerMessage, RpcError> {
        if self.known_addr(to).is_none() && *to != self.self_id {
            return Err(RpcError::Unknown(*to));
        }
        let (tx, rx) = oneshot::channel();
        self.inner.lock().pending.insert(nonce, tx);
        self.send(to, msg);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                self.inner.lock().pending.remove(&nonce);
                Err(RpcError::Timeout(*to))
            }
        }
    }

    /// Route an inbound reply to its waiter. Returns true when consumed.
    pub fn resolve_reply(&self, msg: &PeerMessage) -> bool {
        let Some(nonce) = msg.reply_nonce() else {
            return false;
        };
        let waiter = self.inner.lock().pending.remove(&nonce);
        match waiter {
            Some(tx) => {
                let _ = tx.send(msg.clone());
                true
            }
            None => false,
        }
    }
}

/// Owns one TCP connection; redials with backoff while frames keep coming.
async fn writer_task(
    from: NodeId,
    peer: NodeId,
    addr: String,
    mut rx: mpsc::Receiver<PeerMessage>,
) {
    let mut backoff = REDIAL_BACKOFF_MIN;
    'outer: loop {
        let mut stream = match TcpStream::connect(&addr).await {
            Ok(stream) => {
                backoff = REDIAL_BACKOFF_MIN;
                stream
            }
            Err(e) => {
                debug!(peer = %peer, %addr, error = %e, "peer dial failed");
                // Drain whatever queued while unreachable, then wait.
                while let Ok(dropped) = rx.try_recv() {
                    let _ = dropped;
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(REDIAL_BACKOFF_MAX);
                if rx.is_closed() && rx.is_empty() {
                    return;
                }
                continue;
            }
        };

        while let Some(msg) = rx.recv().await {
            let frame = PeerFrame { from, msg };
            if let Err(e) = write_message(&mut stream, &frame).await {
                warn!(peer = %peer, error = %e, "peer write failed, redialing");
                continue 'outer;
            }
        }
        return; // queue closed: pool dropped the link
    }
}
