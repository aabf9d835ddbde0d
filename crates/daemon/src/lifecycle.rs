// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup, the inbound frame router, join-or-bootstrap,
//! and graceful shutdown.

use crate::apply::ApplyDriver;
use crate::config::DaemonPaths;
use crate::listener::{serve_clients, ListenerCtx};
use crate::membership::{self, MembershipManager, StaticSampler};
use crate::plugins::{KvStorePlugin, Plugin, PluginLoader};
use crate::scheduler::{OutputHub, Scheduler, WorkerDispatch};
use crate::transport::{serve_peers, PeerFrame, PeerMessage, PeerPool};
use crate::updater::{RollingUpdater, UpdateReceiver};
use async_trait::async_trait;
use mesh_adapters::{ContainerExecutor, ExecutorRouter, K8sJobExecutor, ShellExecutor};
use mesh_core::entry::Command;
use mesh_core::{
    ClusterConfig, Node, NodeId, NodeStatus, ResourceSnapshot, Role, SystemClock, TaskResult,
    EPHEMERAL_TAG,
};
use mesh_raft::{RaftConfig, RaftHandle, RaftNode, RaftTransport};
use mesh_state::{load_snapshot, ClusterState, Snapshot};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] mesh_core::config::ConfigError),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("failed to join the cluster within {0} ms")]
    JoinTimeout(u64),
}

impl LifecycleError {
    /// The orchestrator binary's exit-code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::Config(_) => 2,
            LifecycleError::Storage(_) => 3,
            LifecycleError::JoinTimeout(_) => 4,
        }
    }
}

/// Consensus messages ride the shared peer transport.
struct RaftPeerTransport {
    peers: PeerPool,
}

#[async_trait]
impl RaftTransport for RaftPeerTransport {
    async fn send(&self, to: &NodeId, msg: mesh_raft::RaftMessage) {
        self.peers.send(to, PeerMessage::Raft(msg));
    }
}

fn storage_err<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> LifecycleError + '_ {
    move |e| LifecycleError::Storage(format!("{context}: {e}"))
}

/// This node's own directory record, as presented in join requests.
fn self_node(config: &ClusterConfig, resources: ResourceSnapshot) -> Node {
    let (address, port) = config.advertised();
    let tags: BTreeSet<String> = config.tags.iter().cloned().collect();
    // Ephemeral hosts execute work but stay out of the voting set.
    let role = if tags.contains(EPHEMERAL_TAG) { Role::Worker } else { Role::Follower };
    Node {
        id: config.node_id,
        hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
        address,
        port,
        role,
        status: NodeStatus::PendingApproval,
        resources,
        tags,
        joined_at_ms: 0,
        last_seen_ms: 0,
    }
}

fn default_resources() -> ResourceSnapshot {
    ResourceSnapshot {
        cpu_cores: std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1),
        ..ResourceSnapshot::default()
    }
}

/// Run the daemon to completion. Returns on clean shutdown.
pub async fn run(config: ClusterConfig, paths: DaemonPaths) -> Result<(), LifecycleError> {
    let config = Arc::new(config);
    let clock = SystemClock;
    let start_time = Instant::now();

    std::fs::create_dir_all(&paths.data_dir).map_err(storage_err("creating data dir"))?;

    // Exclusive lock: one meshd per state directory.
    let lock_file =
        std::fs::File::create(&paths.lock_path).map_err(storage_err("creating lock file"))?;
    fs2::FileExt::try_lock_exclusive(&lock_file)
        .map_err(|_| LifecycleError::Storage("meshd is already running".into()))?;
    {
        let mut f = &lock_file;
        let _ = write!(f, "{}", std::process::id());
    }
    std::fs::write(&paths.version_path, env!("CARGO_PKG_VERSION"))
        .map_err(storage_err("writing version file"))?;

    // Recover state from the latest snapshot, if any.
    let snapshot = load_snapshot(&paths.snapshot_path).map_err(storage_err("loading snapshot"))?;
    let raft_boundary = snapshot.as_ref().map(|s| (s.seq, s.term));
    let state = Arc::new(RwLock::new(
        snapshot.map(|s| s.state).unwrap_or_default(),
    ));
    if let Some((seq, _)) = raft_boundary {
        info!(seq, "recovered state from snapshot");
    }

    // Transport scaffolding.
    let (inbound_tx, inbound_rx) = mpsc::channel::<PeerFrame>(1024);
    let peers = PeerPool::new(config.node_id, inbound_tx.clone());

    let seed_peers: Vec<(NodeId, String)> =
        config.peers.iter().filter_map(|p| ClusterConfig::parse_peer(p)).collect();
    for (id, addr) in &seed_peers {
        peers.set_addr(*id, addr.clone());
    }
    {
        let state = state.read();
        for node in state.nodes.values() {
            if node.id != config.node_id {
                peers.set_addr(node.id, node.dial_addr());
            }
        }
    }

    // Consensus driver.
    let (raft_peers, voters) = initial_membership(&config, &state.read(), &seed_peers);
    let raft_config = RaftConfig {
        id: config.node_id,
        peers: raft_peers,
        voters,
        election_timeout_min: Duration::from_millis(config.election_timeout_min_ms),
        election_timeout_max: Duration::from_millis(config.election_timeout_max_ms),
        heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
        meta_path: paths.meta_path.clone(),
    };
    let transport = Arc::new(RaftPeerTransport { peers: peers.clone() });
    let (raft_node, raft, apply_rx) =
        RaftNode::new(raft_config, clock.clone(), transport, raft_boundary)
            .map_err(|e| LifecycleError::Storage(e.to_string()))?;
    let mut raft_task = tokio::spawn(raft_node.run());

    // Apply bus + scheduler.
    let hub = Arc::new(OutputHub::new(config.dispatch_stream_buffer_bytes));
    let (scheduler_tx, scheduler_rx) = mpsc::channel(256);
    let driver = ApplyDriver {
        config: Arc::clone(&config),
        snapshot_path: paths.snapshot_path.clone(),
        self_id: config.node_id,
        raft: raft.clone(),
        state: Arc::clone(&state),
        peers: peers.clone(),
        hub: Arc::clone(&hub),
        scheduler_tx,
        apply_rx,
        clock: clock.clone(),
    };
    tokio::spawn(driver.run());

    let scheduler = Scheduler::new(
        Arc::clone(&config),
        raft.clone(),
        Arc::clone(&state),
        peers.clone(),
        clock.clone(),
        scheduler_rx,
    );
    tokio::spawn(scheduler.run());

    // Executors for dispatched work.
    let mut router = ExecutorRouter::new();
    router.register(Arc::new(ShellExecutor::new()));
    router.register(Arc::new(ContainerExecutor::default()));
    match K8sJobExecutor::from_env().await {
        Ok(k8s) => router.register(Arc::new(k8s)),
        Err(e) => debug!(error = %e, "kubernetes executor unavailable"),
    }
    let dispatch = Arc::new(WorkerDispatch::new(config.node_id, router, peers.clone()));

    // Membership + updater + plugins.
    let membership = Arc::new(MembershipManager::new(
        Arc::clone(&config),
        raft.clone(),
        Arc::clone(&state),
        clock.clone(),
    ));
    tokio::spawn(Arc::clone(&membership).run_monitor());
    tokio::spawn(Arc::clone(&membership).run_ephemeral_sweep());

    let sampler = Arc::new(StaticSampler(default_resources()));
    tokio::spawn(membership::run_heartbeat_reporter(
        Arc::clone(&config),
        raft.clone(),
        peers.clone(),
        sampler,
    ));

    let update_rx = Arc::new(UpdateReceiver::new(
        peers.clone(),
        paths.staged_binary_path.clone(),
        paths.backup_binary_path.clone(),
    ));
    let updater = Arc::new(RollingUpdater::new(
        Arc::clone(&config),
        raft.clone(),
        Arc::clone(&state),
        peers.clone(),
        paths.staged_binary_path.clone(),
        paths.backup_binary_path.clone(),
        clock.clone(),
    ));

    let registry: Vec<Box<dyn Plugin>> = vec![Box::new(KvStorePlugin::new())];
    let mut plugin_loader = PluginLoader::load(
        registry,
        &config.plugins,
        paths.plugin_data_dir.clone(),
        Arc::clone(&state),
    )
    .await;
    let host = plugin_loader.host();
    if !host.tool_names().is_empty() {
        info!(tools = ?host.tool_names(), "plugin tools registered");
    }

    // Inbound frame router.
    tokio::spawn(route_frames(
        inbound_rx,
        raft.clone(),
        Arc::clone(&membership),
        Arc::clone(&dispatch),
        Arc::clone(&hub),
        Arc::clone(&update_rx),
        peers.clone(),
        Arc::clone(&config),
    ));

    // Network surfaces.
    let peer_listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(storage_err("binding peer address"))?;
    tokio::spawn(serve_peers(peer_listener, inbound_tx));

    let shutdown = Arc::new(Notify::new());
    let client_listener = TcpListener::bind(&config.client_bind_addr)
        .await
        .map_err(storage_err("binding client address"))?;
    let ctx = Arc::new(ListenerCtx {
        config: Arc::clone(&config),
        raft: raft.clone(),
        state: Arc::clone(&state),
        membership: Arc::clone(&membership),
        updater,
        hub,
        clock: clock.clone(),
        start_time,
        shutdown: Arc::clone(&shutdown),
    });
    tokio::spawn(serve_clients(client_listener, ctx));

    // Become (or find) a member.
    join_or_bootstrap(&config, &raft, &state, &peers, &seed_peers).await?;
    info!(node = %config.node_id, "meshd is up");

    // Run until a shutdown signal, a client shutdown request, or a fatal
    // consensus storage error.
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(storage_err("installing signal handler"))?;
    tokio::select! {
        _ = shutdown.notified() => info!("shutdown requested by client"),
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        result = &mut raft_task => {
            let failure = match result {
                Ok(Ok(())) => "consensus driver exited".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(e) => e.to_string(),
            };
            return Err(LifecycleError::Storage(failure));
        }
    }

    // Graceful teardown: plugins in reverse init order, then a final
    // snapshot so restart replay is short.
    plugin_loader.shutdown().await;
    let final_snapshot = Snapshot::of(&state.read());
    if let Err(e) = final_snapshot.save(&paths.snapshot_path) {
        warn!(error = %e, "final snapshot failed");
    }
    info!("meshd stopped");
    Ok(())
}

/// Initial replication/voting sets before any entries apply: the snapshot
/// when there is one, the config seeds otherwise.
fn initial_membership(
    config: &ClusterConfig,
    state: &ClusterState,
    seeds: &[(NodeId, String)],
) -> (Vec<NodeId>, Vec<NodeId>) {
    if !state.nodes.is_empty() {
        let peers =
            state.nodes.keys().filter(|id| **id != config.node_id).copied().collect();
        let voters = MembershipManager::<SystemClock>::voting_set(state, config.node_id);
        return (peers, voters);
    }
    let peer_ids: Vec<NodeId> =
        seeds.iter().map(|(id, _)| *id).filter(|id| *id != config.node_id).collect();
    let mut voters = peer_ids.clone();
    let tags: BTreeSet<String> = config.tags.iter().cloned().collect();
    if !tags.contains(EPHEMERAL_TAG) {
        voters.push(config.node_id);
    }
    (peer_ids, voters)
}

/// Present ourselves to the cluster until our record is active, or bail
/// with exit code 4 when joining an existing cluster times out.
async fn join_or_bootstrap(
    config: &Arc<ClusterConfig>,
    raft: &RaftHandle,
    state: &Arc<RwLock<ClusterState>>,
    peers: &PeerPool,
    seeds: &[(NodeId, String)],
) -> Result<(), LifecycleError> {
    let joining_existing = !seeds.is_empty();
    let deadline = Instant::now() + Duration::from_millis(config.join_timeout_ms);
    let record = self_node(config, default_resources());

    loop {
        {
            let state = state.read();
            if state
                .get_node(&config.node_id)
                .map(|n| n.status == NodeStatus::Active)
                .unwrap_or(false)
            {
                return Ok(());
            }
        }
        if let Some(leader) = raft.current_leader() {
            peers.send(&leader, PeerMessage::JoinRequest { node: record.clone() });
        }
        if joining_existing && Instant::now() > deadline {
            return Err(LifecycleError::JoinTimeout(config.join_timeout_ms));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

/// Demultiplex inbound peer frames to the owning components.
#[allow(clippy::too_many_arguments)]
async fn route_frames(
    mut inbound: mpsc::Receiver<PeerFrame>,
    raft: RaftHandle,
    membership: Arc<MembershipManager<SystemClock>>,
    dispatch: Arc<WorkerDispatch>,
    hub: Arc<OutputHub>,
    update_rx: Arc<UpdateReceiver>,
    peers: PeerPool,
    config: Arc<ClusterConfig>,
) {
    while let Some(frame) = inbound.recv().await {
        // Correlated replies (probe/push/activate acks) go to their waiters.
        if peers.resolve_reply(&frame.msg) {
            continue;
        }
        let from = frame.from;
        match frame.msg {
            PeerMessage::Raft(msg) => raft.inbound(from, msg).await,

            PeerMessage::Heartbeat { resources, .. } => {
                if raft.is_leader() {
                    let membership = Arc::clone(&membership);
                    tokio::spawn(async move {
                        membership.on_heartbeat(from, resources).await;
                    });
                }
            }
            PeerMessage::JoinRequest { node } => {
                if raft.is_leader() {
                    let membership = Arc::clone(&membership);
                    let peers = peers.clone();
                    tokio::spawn(async move {
                        match membership.handle_join(node).await {
                            Ok((request_id, status)) => {
                                peers.send(
                                    &from,
                                    PeerMessage::JoinReply {
                                        request_id,
                                        status: status.to_string(),
                                    },
                                );
                            }
                            Err(e) => warn!(node = %from, error = %e, "join handling failed"),
                        }
                    });
                }
            }
            PeerMessage::JoinReply { status, .. } => {
                info!(%status, "join request acknowledged");
            }

            PeerMessage::Dispatch { task_id, spec, .. } => {
                dispatch.start(from, task_id, spec);
            }
            PeerMessage::TaskStartedMsg { task_id } => {
                if raft.is_leader() {
                    let raft = raft.clone();
                    tokio::spawn(async move {
                        let cmd = Command::TaskStarted { task_id, node_id: from };
                        if let Err(e) = raft.propose(cmd).await {
                            debug!(task = %task_id, error = %e, "started proposal failed");
                        }
                    });
                }
            }
            PeerMessage::TaskOutput { task_id, channel, bytes } => {
                hub.push(task_id, channel, bytes);
            }
            PeerMessage::TaskDone { task_id, exit_code, stdout_tail, stderr_tail, error } => {
                if raft.is_leader() {
                    let raft = raft.clone();
                    let timeout = Duration::from_millis(config.propose_timeout_ms);
                    tokio::spawn(async move {
                        let result = TaskResult {
                            exit_code,
                            stdout: stdout_tail,
                            stderr: stderr_tail,
                        };
                        let cmd = if error.is_none() && exit_code == 0 {
                            Command::TaskComplete { task_id, result }
                        } else {
                            let error =
                                error.unwrap_or_else(|| format!("exit code {exit_code}"));
                            Command::TaskFailed { task_id, error, result: Some(result) }
                        };
                        if let Ok(Err(e)) =
                            tokio::time::timeout(timeout, raft.propose(cmd)).await
                        {
                            warn!(task = %task_id, error = %e, "completion proposal failed");
                        }
                    });
                }
            }
            PeerMessage::CancelTask { task_id } => dispatch.cancel(&task_id),

            msg @ (PeerMessage::Probe { .. }
            | PeerMessage::PushBinary { .. }
            | PeerMessage::ActivateBinary { .. }
            | PeerMessage::RollbackBinary { .. }) => {
                update_rx.handle(from, msg);
            }

            // Replies with no waiter (stale or duplicated).
            PeerMessage::ProbeAck { .. }
            | PeerMessage::PushBinaryAck { .. }
            | PeerMessage::ActivateAck { .. }
            | PeerMessage::RollbackAck { .. } => {
                debug!(from = %from, "uncorrelated reply dropped");
            }
        }
    }
}
