// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam between the consensus driver and the network.
//!
//! The driver addresses peers by node id; resolving an id to a reachable
//! address is the transport's problem (peer discovery is external). Sends
//! are fire-and-forget; the heartbeat cadence is the retry loop, so an
//! unreachable peer costs a warn, never a stall.

use crate::message::RaftMessage;
use async_trait::async_trait;
use mesh_core::node::NodeId;

#[async_trait]
pub trait RaftTransport: Send + Sync + 'static {
    /// Deliver a consensus message to a peer. Best-effort; failures are the
    /// implementation's to log.
    async fn send(&self, to: &NodeId, msg: RaftMessage);
}

/// In-memory transport wiring a set of [`crate::RaftHandle`]s together,
/// with per-link partition control. Test-only.
#[cfg(any(test, feature = "test-support"))]
pub use mesh_impl::{InMemoryMesh, MeshEndpoint};

#[cfg(any(test, feature = "test-support"))]
mod mesh_impl {
    use super::*;
    use crate::handle::RaftHandle;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    #[derive(Default)]
    struct MeshInner {
        nodes: HashMap<NodeId, RaftHandle>,
        /// Links currently blackholed, as (from, to) pairs.
        cut: HashSet<(NodeId, NodeId)>,
    }

    /// Routes messages directly into each node's inbox.
    #[derive(Clone, Default)]
    pub struct InMemoryMesh {
        inner: Arc<Mutex<MeshInner>>,
    }

    impl InMemoryMesh {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn register(&self, id: NodeId, handle: RaftHandle) {
            self.inner.lock().nodes.insert(id, handle);
        }

        /// Sever both directions between two nodes.
        pub fn partition(&self, a: &NodeId, b: &NodeId) {
            let mut inner = self.inner.lock();
            inner.cut.insert((*a, *b));
            inner.cut.insert((*b, *a));
        }

        /// Restore both directions between two nodes.
        pub fn heal(&self, a: &NodeId, b: &NodeId) {
            let mut inner = self.inner.lock();
            inner.cut.remove(&(*a, *b));
            inner.cut.remove(&(*b, *a));
        }

        /// Transport endpoint for one node.
        pub fn endpoint(&self, id: NodeId) -> MeshEndpoint {
            MeshEndpoint { from: id, mesh: self.clone() }
        }
    }

    pub struct MeshEndpoint {
        from: NodeId,
        mesh: InMemoryMesh,
    }

    #[async_trait]
    impl RaftTransport for MeshEndpoint {
        async fn send(&self, to: &NodeId, msg: RaftMessage) {
            let handle = {
                let inner = self.mesh.inner.lock();
                if inner.cut.contains(&(self.from, *to)) {
                    return;
                }
                inner.nodes.get(to).cloned()
            };
            if let Some(handle) = handle {
                handle.inbound(self.from, msg).await;
            }
        }
    }
}
